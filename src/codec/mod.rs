//! Serialization codec
//!
//! Converts attribute containers to and from their durable byte form.
//!
//! # Guarantees
//!
//! - Deterministic: the same container and schema version always produce
//!   byte-identical output (attributes are written in declaration order)
//! - Self-describing: each attribute carries its name, kind tag and length
//! - Checksummed: a trailing CRC32 covers the whole record, so truncation
//!   from abnormal termination is detected
//! - Any byte sequence that is not a valid encoding decodes to
//!   `CorruptRecord`, never to another error or a wrong container

mod checksum;
pub mod frame;
mod raw;

pub use checksum::{compute_checksum, verify_checksum};
pub use raw::{record_schema_version, RawRecord};

use crate::container::{AttributeContainer, ContainerIdentifier};
use crate::errors::{StoreError, StoreResult};
use crate::schema::Schema;

/// Encodes a container tagged with `schema_version`.
pub fn encode(container: &AttributeContainer, schema_version: u32) -> StoreResult<Vec<u8>> {
    RawRecord::from_container(container, schema_version).encode()
}

/// Decodes a record and resolves it against the type registry of `schema`.
///
/// Returns the container and the schema version the record was written
/// with. Records from older versions are decoded as-is; upgrading them is
/// the migration table's job.
pub fn decode(bytes: &[u8], schema: &Schema) -> StoreResult<(AttributeContainer, u32)> {
    let raw = RawRecord::decode(bytes)?;
    let schema_version = raw.schema_version;
    let container = resolve(raw, schema)?;
    Ok((container, schema_version))
}

/// Builds a typed container from a raw record.
pub fn resolve(raw: RawRecord, schema: &Schema) -> StoreResult<AttributeContainer> {
    let container_type = schema
        .container_type(&raw.type_name)
        .ok_or_else(|| StoreError::unknown_type(&raw.type_name))?;

    let mut container = AttributeContainer::new(container_type.clone());
    for (name, value) in raw.attributes {
        let position = container_type.check_value(&name, &value)?;
        container.set_value_at(position, value);
    }

    if let Some(seq) = raw.sequence_number {
        container.set_identifier(ContainerIdentifier::new(raw.type_name, seq))?;
    }

    Ok(container)
}
