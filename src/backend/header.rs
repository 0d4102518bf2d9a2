//! Store header
//!
//! Fixed-size header at the start of every data file:
//!
//! ```text
//! +------------------+
//! | Magic            | (8 bytes, "ACSTORE\0")
//! +------------------+
//! | Format Version   | (u16 LE)
//! +------------------+
//! | Schema Version   | (u32 LE)
//! +------------------+
//! | Created At       | (i64 LE, microseconds since the Unix epoch)
//! +------------------+
//! | Generation       | (16 bytes, UUID)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 of the preceding bytes)
//! +------------------+
//! ```
//!
//! The generation changes whenever the data file is replaced by a
//! migration; the index file carries the generation it describes.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::codec::compute_checksum;
use crate::errors::{StoreError, StoreResult};

pub const STORE_MAGIC: [u8; 8] = *b"ACSTORE\0";

/// Version of the on-disk layout, independent of the schema version
pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 8 + 2 + 4 + 8 + 16 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    pub format_version: u16,
    pub schema_version: u32,
    /// Microseconds since the Unix epoch
    pub created_at: i64,
    pub generation: Uuid,
}

impl StoreHeader {
    /// Header for a store created now.
    pub fn new(schema_version: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema_version,
            created_at: Utc::now().timestamp_micros(),
            generation: Uuid::new_v4(),
        }
    }

    /// Header of the data file replacing this one after a migration.
    pub fn next_generation(&self, schema_version: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema_version,
            created_at: self.created_at,
            generation: Uuid::new_v4(),
        }
    }

    pub fn created_at_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_micros(self.created_at).single()
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&STORE_MAGIC);
        buf[8..10].copy_from_slice(&self.format_version.to_le_bytes());
        buf[10..14].copy_from_slice(&self.schema_version.to_le_bytes());
        buf[14..22].copy_from_slice(&self.created_at.to_le_bytes());
        buf[22..38].copy_from_slice(self.generation.as_bytes());
        let checksum = compute_checksum(&buf[..38]);
        buf[38..42].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::corrupt_at_offset(
                0,
                format!("store header truncated: {} bytes", bytes.len()),
            ));
        }
        if bytes[0..8] != STORE_MAGIC {
            return Err(StoreError::corrupt_at_offset(0, "not an attribute container store"));
        }

        let stored = u32::from_le_bytes([bytes[38], bytes[39], bytes[40], bytes[41]]);
        let computed = compute_checksum(&bytes[..38]);
        if stored != computed {
            return Err(StoreError::corrupt_at_offset(
                0,
                format!(
                    "store header checksum mismatch: computed {:08x}, stored {:08x}",
                    computed, stored
                ),
            ));
        }

        let format_version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if format_version != FORMAT_VERSION {
            return Err(StoreError::unsupported_schema(
                format_version as u32,
                FORMAT_VERSION as u32,
                "unknown store file format",
            ));
        }

        let mut schema_version = [0u8; 4];
        schema_version.copy_from_slice(&bytes[10..14]);
        let mut created_at = [0u8; 8];
        created_at.copy_from_slice(&bytes[14..22]);
        let mut generation = [0u8; 16];
        generation.copy_from_slice(&bytes[22..38]);

        Ok(Self {
            format_version,
            schema_version: u32::from_le_bytes(schema_version),
            created_at: i64::from_le_bytes(created_at),
            generation: Uuid::from_bytes(generation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreErrorCode;

    #[test]
    fn test_header_roundtrip() {
        let header = StoreHeader::new(3);
        let decoded = StoreHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.created_at_datetime().is_some());
    }

    #[test]
    fn test_next_generation_keeps_creation_time() {
        let header = StoreHeader::new(1);
        let next = header.next_generation(2);
        assert_eq!(next.created_at, header.created_at);
        assert_eq!(next.schema_version, 2);
        assert_ne!(next.generation, header.generation);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = StoreHeader::new(1).encode();
        bytes[0] = b'X';
        assert_eq!(
            StoreHeader::decode(&bytes).unwrap_err().code(),
            StoreErrorCode::CorruptRecord
        );
    }

    #[test]
    fn test_flipped_bit_detected() {
        let header = StoreHeader::new(1);
        for i in 8..HEADER_SIZE {
            let mut bytes = header.encode();
            bytes[i] ^= 0x01;
            assert!(StoreHeader::decode(&bytes).is_err(), "byte {}", i);
        }
    }

    #[test]
    fn test_truncated() {
        let bytes = StoreHeader::new(1).encode();
        assert!(StoreHeader::decode(&bytes[..HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_unknown_format_version() {
        let mut header = StoreHeader::new(1);
        header.format_version = FORMAT_VERSION + 1;
        let err = StoreHeader::decode(&header.encode()).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::UnsupportedSchema);
    }
}
