//! Schema subsystem
//!
//! A schema is the closed set of container types a store accepts, tagged
//! with a version, plus the migration table that upgrades records written
//! by earlier versions.
//!
//! # Design Principles
//!
//! - Explicit: the schema is a value handed to the store, never global state
//! - Closed: undeclared attributes and mismatched kinds are rejected on set
//! - Versioned: every record carries the version it was written with
//! - Evolvable: migrations are pure functions chained in version order

mod loader;
mod migration;
mod registry;
mod types;
mod version;

pub use migration::{MigrationEntry, MigrationFn, MigrationTable};
pub use registry::Schema;
pub use types::{AttributeDef, AttributeKind, ContainerType};
pub use version::{SchemaVersionManager, VersionState};
