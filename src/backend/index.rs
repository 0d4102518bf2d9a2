//! Record index
//!
//! Maps identifiers to the position of their committed record, keeps write
//! order per type and tracks the largest sequence number per type.
//!
//! The file backend persists the index as:
//!
//! ```text
//! +----------------------+
//! | Magic                | (8 bytes, "ACSINDEX")
//! | Format Version       | (u16 LE)
//! | Generation           | (16 bytes, must match the data file header)
//! | Schema Version       | (u32 LE)
//! | Committed Log End    | (u64 LE, first byte past the last committed record)
//! | Entry Count          | (u64 LE)
//! +----------------------+
//! | Entry *              | type name (u16 length + UTF-8)
//! |                      | sequence number (u64 LE)
//! |                      | offset (u64 LE)
//! |                      | length (u32 LE)
//! +----------------------+
//! | Checksum             | (u32 LE, CRC32 of everything before it)
//! +----------------------+
//! ```
//!
//! Entries are stored in write order, which is ascending offset order.

use std::collections::HashMap;

use uuid::Uuid;

use super::header::FORMAT_VERSION;
use crate::codec::compute_checksum;
use crate::container::ContainerIdentifier;
use crate::errors::{StoreError, StoreResult};

pub const INDEX_MAGIC: [u8; 8] = *b"ACSINDEX";

/// Location of one committed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub identifier: ContainerIdentifier,
    pub offset: u64,
    pub length: u32,
}

impl IndexEntry {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Fields of the index file outside the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub generation: Uuid,
    pub schema_version: u32,
    pub committed_log_end: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    entries: Vec<IndexEntry>,
    by_type: HashMap<String, Vec<usize>>,
    by_identifier: HashMap<ContainerIdentifier, usize>,
    by_offset: HashMap<u64, usize>,
    last_sequence: HashMap<String, u64>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry at the end of the write order.
    pub fn insert(&mut self, entry: IndexEntry) -> StoreResult<()> {
        if self.by_identifier.contains_key(&entry.identifier) {
            return Err(StoreError::duplicate_identifier(&entry.identifier));
        }
        let position = self.entries.len();
        let type_name = entry.identifier.type_name().to_string();
        let sequence_number = entry.identifier.sequence_number();

        self.by_identifier.insert(entry.identifier.clone(), position);
        self.by_offset.insert(entry.offset, position);
        self.by_type.entry(type_name.clone()).or_default().push(position);
        let last = self.last_sequence.entry(type_name).or_insert(0);
        *last = (*last).max(sequence_number);
        self.entries.push(entry);
        Ok(())
    }

    /// Appends every entry of `other`, in its write order.
    pub fn extend(&mut self, other: &RecordIndex) -> StoreResult<()> {
        for entry in &other.entries {
            self.insert(entry.clone())?;
        }
        Ok(())
    }

    pub fn get(&self, identifier: &ContainerIdentifier) -> Option<&IndexEntry> {
        self.by_identifier.get(identifier).map(|&p| &self.entries[p])
    }

    pub fn get_at(&self, offset: u64) -> Option<&IndexEntry> {
        self.by_offset.get(&offset).map(|&p| &self.entries[p])
    }

    pub fn contains(&self, identifier: &ContainerIdentifier) -> bool {
        self.by_identifier.contains_key(identifier)
    }

    /// Entries of a type in write order, copied so the caller holds a
    /// snapshot.
    pub fn entries_of_type(&self, type_name: &str) -> Vec<IndexEntry> {
        self.by_type
            .get(type_name)
            .map(|positions| positions.iter().map(|&p| self.entries[p].clone()).collect())
            .unwrap_or_default()
    }

    /// All entries in write order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.by_type.get(type_name).map_or(0, Vec::len)
    }

    pub fn last_sequence_number(&self, type_name: &str) -> u64 {
        self.last_sequence.get(type_name).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Serializes the index for the file backend.
    pub fn encode(&self, header: &IndexHeader) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(64 + self.entries.len() * 48);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(header.generation.as_bytes());
        buf.extend_from_slice(&header.schema_version.to_le_bytes());
        buf.extend_from_slice(&header.committed_log_end.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());

        for entry in &self.entries {
            let type_name = entry.identifier.type_name().as_bytes();
            if type_name.len() > u16::MAX as usize {
                return Err(StoreError::encoding("type name exceeds index limit"));
            }
            buf.extend_from_slice(&(type_name.len() as u16).to_le_bytes());
            buf.extend_from_slice(type_name);
            buf.extend_from_slice(&entry.identifier.sequence_number().to_le_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.length.to_le_bytes());
        }

        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Parses an index file. Any inconsistency is `CorruptRecord`.
    pub fn decode(bytes: &[u8]) -> StoreResult<(IndexHeader, RecordIndex)> {
        if bytes.len() < 4 {
            return Err(StoreError::corrupt_record("index file truncated"));
        }
        let body_len = bytes.len() - 4;
        let stored = u32::from_le_bytes([
            bytes[body_len],
            bytes[body_len + 1],
            bytes[body_len + 2],
            bytes[body_len + 3],
        ]);
        let computed = compute_checksum(&bytes[..body_len]);
        if stored != computed {
            return Err(StoreError::corrupt_record(format!(
                "index checksum mismatch: computed {:08x}, stored {:08x}",
                computed, stored
            )));
        }

        let mut cursor = Cursor::new(&bytes[..body_len]);
        if cursor.take(8)? != INDEX_MAGIC {
            return Err(StoreError::corrupt_record("not a store index file"));
        }
        let format_version = cursor.u16()?;
        if format_version != FORMAT_VERSION {
            return Err(StoreError::unsupported_schema(
                format_version as u32,
                FORMAT_VERSION as u32,
                "unknown index file format",
            ));
        }
        let mut generation = [0u8; 16];
        generation.copy_from_slice(cursor.take(16)?);
        let header = IndexHeader {
            generation: Uuid::from_bytes(generation),
            schema_version: cursor.u32()?,
            committed_log_end: cursor.u64()?,
        };

        let count = cursor.u64()?;
        let mut index = RecordIndex::new();
        let mut previous_end = 0u64;
        for _ in 0..count {
            let type_len = cursor.u16()? as usize;
            let type_name = std::str::from_utf8(cursor.take(type_len)?)
                .map_err(|_| StoreError::corrupt_record("index type name is not UTF-8"))?
                .to_string();
            let sequence_number = cursor.u64()?;
            let offset = cursor.u64()?;
            let length = cursor.u32()?;

            let entry = IndexEntry {
                identifier: ContainerIdentifier::new(type_name, sequence_number),
                offset,
                length,
            };
            if entry.offset < previous_end || entry.end() > header.committed_log_end {
                return Err(StoreError::corrupt_record(format!(
                    "index entry {} at offset {} is out of order or past the log end",
                    entry.identifier, entry.offset
                )));
            }
            previous_end = entry.end();
            index
                .insert(entry)
                .map_err(|e| StoreError::corrupt_record(format!("index: {}", e.message())))?;
        }

        if !cursor.is_exhausted() {
            return Err(StoreError::corrupt_record("unparsed bytes in index file"));
        }

        Ok((header, index))
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| StoreError::corrupt_record("index file truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> StoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> StoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> StoreResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
