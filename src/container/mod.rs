//! Attribute container model
//!
//! An attribute container is a typed record: a registered type name, an
//! identifier unique within that type, and an ordered mapping of declared
//! attributes to values. The attribute set of every type is closed; setting
//! an undeclared attribute or a value of the wrong kind is rejected before
//! the container ever reaches the store.

mod attribute_container;
mod expression;
mod identifier;
mod value;

pub use attribute_container::AttributeContainer;
pub use expression::{Comparison, FilterExpression, Literal, Operator};
pub use identifier::ContainerIdentifier;
pub use value::Value;
