//! Store fixtures for crash scenarios

use std::path::{Path, PathBuf};

use acstore::codec::RawRecord;
use acstore::{AttributeContainer, AttributeKind, ContainerType, MigrationEntry, OpenMode, Schema, Store};

pub const STORE_FILE: &str = "case.acs";

pub fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORE_FILE)
}

pub fn store_location(data_dir: &Path) -> String {
    store_path(data_dir).to_string_lossy().to_string()
}

/// file_entry { path, size }
pub fn schema_v1() -> Schema {
    Schema::new(1)
        .with_type(
            ContainerType::new("file_entry")
                .attribute("path", AttributeKind::String)
                .attribute("size", AttributeKind::Integer),
        )
        .unwrap()
}

/// file_entry { path, size_bytes }, migrated from v1
pub fn schema_v2() -> Schema {
    Schema::new(2)
        .with_type(
            ContainerType::new("file_entry")
                .attribute("path", AttributeKind::String)
                .attribute("size_bytes", AttributeKind::Integer),
        )
        .unwrap()
        .with_migration(
            MigrationEntry::new(1, 2, |mut record: RawRecord| {
                record.rename_attribute("size", "size_bytes");
                Ok(record)
            })
            .unwrap(),
        )
        .unwrap()
}

pub fn file_entry(schema: &Schema, size: i64) -> AttributeContainer {
    let mut c = schema.create("file_entry").unwrap();
    c.set_attribute("path", format!("/evidence/{}", size)).unwrap();
    c.set_attribute("size", size).unwrap();
    c
}

/// Creates a v1 store holding `count` committed file entries.
pub fn populate(data_dir: &Path, count: i64) {
    let schema = schema_v1();
    let mut store = Store::open(&store_location(data_dir), OpenMode::Create, schema.clone()).unwrap();
    for size in 0..count {
        store.write(&mut file_entry(&schema, size)).unwrap();
    }
    store.close().unwrap();
}

/// Committed file entries visible to a read-only open with `schema`.
pub fn committed_count(data_dir: &Path, schema: Schema) -> usize {
    let store = Store::open(&store_location(data_dir), OpenMode::ReadOnly, schema).unwrap();
    store.scan("file_entry").unwrap().filter(|c| c.is_ok()).count()
}
