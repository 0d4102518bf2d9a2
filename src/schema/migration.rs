//! Schema migration table
//!
//! A migration entry upgrades a serialized record from one schema version
//! to a later one. Entries are pure functions over `RawRecord`, so they can
//! be tested without any storage backend. The table chains entries in
//! strictly increasing version order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::RawRecord;
use crate::errors::{StoreError, StoreErrorCode, StoreResult};

/// Transformation applied to a record by a migration entry
pub type MigrationFn = dyn Fn(RawRecord) -> StoreResult<RawRecord> + Send + Sync;

/// One step in the migration chain.
#[derive(Clone)]
pub struct MigrationEntry {
    from: u32,
    to: u32,
    transform: Arc<MigrationFn>,
}

impl MigrationEntry {
    /// Creates an entry upgrading records from `from` to `to`.
    pub fn new<F>(from: u32, to: u32, transform: F) -> StoreResult<Self>
    where
        F: Fn(RawRecord) -> StoreResult<RawRecord> + Send + Sync + 'static,
    {
        if from == 0 || to <= from {
            return Err(StoreError::invalid_migration(format!(
                "migration {} -> {} must go to a strictly higher version",
                from, to
            )));
        }
        Ok(Self {
            from,
            to,
            transform: Arc::new(transform),
        })
    }

    pub fn from_version(&self) -> u32 {
        self.from
    }

    pub fn to_version(&self) -> u32 {
        self.to
    }

    /// Applies the transformation to a decoded record.
    pub fn apply_raw(&self, record: RawRecord) -> StoreResult<RawRecord> {
        if record.schema_version != self.from {
            return Err(StoreError::invalid_migration(format!(
                "migration {} -> {} applied to a version {} record",
                self.from, self.to, record.schema_version
            )));
        }
        let identifier = record.sequence_number;
        let type_name = record.type_name.clone();

        let mut migrated = (self.transform)(record)?;

        // Identity survives migration
        if migrated.sequence_number != identifier {
            return Err(StoreError::invalid_migration(format!(
                "migration {} -> {} changed the identifier of a '{}' record",
                self.from, self.to, type_name
            )));
        }
        migrated.schema_version = self.to;
        Ok(migrated)
    }

    /// Applies the transformation to a serialized record.
    pub fn apply(&self, bytes: &[u8]) -> StoreResult<Vec<u8>> {
        let record = RawRecord::decode(bytes)?;
        self.apply_raw(record)?.encode()
    }
}

impl fmt::Debug for MigrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEntry")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Registered migrations keyed by source version.
#[derive(Debug, Clone, Default)]
pub struct MigrationTable {
    entries: BTreeMap<u32, MigrationEntry>,
}

impl MigrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry. Only one entry may start at a given version.
    pub fn register(&mut self, entry: MigrationEntry) -> StoreResult<()> {
        if self.entries.contains_key(&entry.from) {
            return Err(StoreError::new(
                StoreErrorCode::InvalidMigration,
                format!("a migration from version {} is already registered", entry.from),
            ));
        }
        self.entries.insert(entry.from, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries leading from `from` to exactly `to`, in order.
    ///
    /// `None` when the chain is broken or overshoots `to`.
    pub fn chain(&self, from: u32, to: u32) -> Option<Vec<&MigrationEntry>> {
        let mut chain = Vec::new();
        let mut version = from;
        while version < to {
            let entry = self.entries.get(&version)?;
            chain.push(entry);
            version = entry.to;
        }
        if version == to {
            Some(chain)
        } else {
            None
        }
    }

    /// Upgrades a decoded record to `to`.
    pub fn migrate_raw(&self, record: RawRecord, to: u32) -> StoreResult<RawRecord> {
        let from = record.schema_version;
        let chain = self.chain(from, to).ok_or_else(|| {
            StoreError::unsupported_schema(from, to, "no migration path")
        })?;
        chain
            .into_iter()
            .try_fold(record, |record, entry| entry.apply_raw(record))
    }

    /// Upgrades a serialized record to `to`.
    pub fn migrate(&self, bytes: &[u8], to: u32) -> StoreResult<Vec<u8>> {
        let record = RawRecord::decode(bytes)?;
        self.migrate_raw(record, to)?.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Value;

    fn record_v1() -> RawRecord {
        RawRecord {
            schema_version: 1,
            type_name: "file_entry".to_string(),
            sequence_number: Some(3),
            attributes: vec![("filename".to_string(), Value::from("/etc/passwd"))],
        }
    }

    fn table() -> MigrationTable {
        let mut table = MigrationTable::new();
        table
            .register(
                MigrationEntry::new(1, 2, |mut r| {
                    r.rename_attribute("filename", "path");
                    Ok(r)
                })
                .unwrap(),
            )
            .unwrap();
        table
            .register(
                MigrationEntry::new(2, 3, |mut r| {
                    r.set_attribute("size", 0i64);
                    Ok(r)
                })
                .unwrap(),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_entry_must_increase_version() {
        assert!(MigrationEntry::new(2, 2, Ok).is_err());
        assert!(MigrationEntry::new(3, 1, Ok).is_err());
        assert!(MigrationEntry::new(0, 1, Ok).is_err());
        assert!(MigrationEntry::new(1, 3, Ok).is_ok());
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut table = table();
        let err = table
            .register(MigrationEntry::new(1, 3, Ok).unwrap())
            .unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::InvalidMigration);
    }

    #[test]
    fn test_chain_composition() {
        let table = table();
        assert_eq!(table.chain(1, 3).unwrap().len(), 2);
        assert_eq!(table.chain(2, 3).unwrap().len(), 1);
        assert_eq!(table.chain(3, 3).unwrap().len(), 0);
        assert!(table.chain(1, 4).is_none());
        assert!(table.chain(0, 3).is_none());
    }

    #[test]
    fn test_chain_overshoot_is_none() {
        let mut table = MigrationTable::new();
        table.register(MigrationEntry::new(1, 3, Ok).unwrap()).unwrap();
        assert!(table.chain(1, 2).is_none());
        assert!(table.chain(1, 3).is_some());
    }

    #[test]
    fn test_migrate_raw_applies_in_order() {
        let migrated = table().migrate_raw(record_v1(), 3).unwrap();
        assert_eq!(migrated.schema_version, 3);
        assert_eq!(migrated.attribute("path"), Some(&Value::from("/etc/passwd")));
        assert_eq!(migrated.attribute("size"), Some(&Value::Integer(0)));
        assert!(migrated.attribute("filename").is_none());
    }

    #[test]
    fn test_migrate_bytes_is_deterministic() {
        let bytes = record_v1().encode().unwrap();
        let table = table();
        assert_eq!(table.migrate(&bytes, 3).unwrap(), table.migrate(&bytes, 3).unwrap());

        let stepwise = table.chain(1, 3).unwrap().iter().try_fold(bytes.clone(), |b, e| e.apply(&b)).unwrap();
        assert_eq!(stepwise, table.migrate(&bytes, 3).unwrap());
    }

    #[test]
    fn test_identifier_change_rejected() {
        let entry = MigrationEntry::new(1, 2, |mut r| {
            r.sequence_number = None;
            Ok(r)
        })
        .unwrap();
        let err = entry.apply_raw(record_v1()).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::InvalidMigration);
    }

    #[test]
    fn test_missing_path_is_unsupported() {
        let err = MigrationTable::new().migrate_raw(record_v1(), 2).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::UnsupportedSchema);
    }
}
