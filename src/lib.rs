//! acstore - Attribute container storage
//!
//! Persists typed attribute containers produced by forensic extraction
//! pipelines and serves them back by identifier or by type, across process
//! restarts and schema versions.
//!
//! - `container`: typed records validated against a closed schema
//! - `schema`: type registry, migration table and version state machine
//! - `codec`: deterministic, checksummed record encoding
//! - `backend`: file and in-memory persistence with commit-time visibility
//! - `store`: the consumer interface

pub mod backend;
pub mod codec;
pub mod container;
pub mod crash_point;
pub mod errors;
pub mod observability;
pub mod schema;
pub mod store;

pub use backend::OpenMode;
pub use container::{AttributeContainer, ContainerIdentifier, FilterExpression, Value};
pub use errors::{ErrorCategory, StoreError, StoreErrorCode, StoreResult};
pub use schema::{AttributeKind, ContainerType, MigrationEntry, Schema};
pub use store::{ContainerScan, Store, StoreConfig};
