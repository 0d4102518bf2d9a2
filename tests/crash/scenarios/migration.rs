//! Migration crash scenarios
//!
//! - Crash before the data file swap: the store is still at the old
//!   version and the staged files are discarded on the next writer open
//! - Crash between the data and index swaps: the next writer open completes
//!   the swap

use std::path::Path;

use acstore::crash_point::points;
use acstore::{OpenMode, Store, StoreErrorCode};
use tempfile::TempDir;

use crate::crash::{
    assert_crashed_at, child_data_dir, committed_count, populate, run_child, schema_v1, schema_v2,
    store_location, store_path,
};

const CHILD_BEFORE_DATA_SWAP: &str = "crash::scenarios::migration::child_migration_before_data_swap";
const CHILD_BEFORE_INDEX_SWAP: &str = "crash::scenarios::migration::child_migration_before_index_swap";

fn open_with_v2() {
    let Some(data_dir) = child_data_dir() else {
        return;
    };
    let _store = Store::open(&store_location(&data_dir), OpenMode::ReadWrite, schema_v2()).unwrap();
    panic!("crash point not reached");
}

fn staged_files_exist(data_dir: &Path) -> bool {
    let path = store_path(data_dir);
    let staged = |suffix: &str| {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        Path::new(&name).exists()
    };
    staged(".migrate") || staged(".migrate.index")
}

#[test]
fn child_migration_before_data_swap() {
    open_with_v2();
}

#[test]
fn child_migration_before_index_swap() {
    open_with_v2();
}

#[test]
fn test_crash_before_data_swap_keeps_old_version() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 4);

    let result = run_child(CHILD_BEFORE_DATA_SWAP, points::MIGRATION_BEFORE_DATA_SWAP, dir.path());
    assert_crashed_at(&result, points::MIGRATION_BEFORE_DATA_SWAP);
    assert!(staged_files_exist(dir.path()));

    // Still a v1 store
    let store = Store::open(&store_location(dir.path()), OpenMode::ReadOnly, schema_v1()).unwrap();
    assert_eq!(store.schema_version(), 1);
    assert_eq!(store.count("file_entry").unwrap(), 4);
    drop(store);

    // The next writer discards the staged files and migrates again
    let store = Store::open(&store_location(dir.path()), OpenMode::ReadWrite, schema_v2()).unwrap();
    assert_eq!(store.schema_version(), 2);
    assert_eq!(store.metrics().records_migrated, 4);
    store.close().unwrap();
    assert!(!staged_files_exist(dir.path()));
    assert_eq!(committed_count(dir.path(), schema_v2()), 4);
}

#[test]
fn test_crash_before_index_swap_rolls_forward() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 4);

    let result = run_child(CHILD_BEFORE_INDEX_SWAP, points::MIGRATION_BEFORE_INDEX_SWAP, dir.path());
    assert_crashed_at(&result, points::MIGRATION_BEFORE_INDEX_SWAP);

    // The data file is already v2; readers use the staged index
    let err = Store::open(&store_location(dir.path()), OpenMode::ReadOnly, schema_v1())
        .err()
        .unwrap();
    assert_eq!(err.code(), StoreErrorCode::UnsupportedSchema);
    assert_eq!(committed_count(dir.path(), schema_v2()), 4);
    assert!(staged_files_exist(dir.path()));

    // The next writer completes the swap without migrating again
    let store = Store::open(&store_location(dir.path()), OpenMode::ReadWrite, schema_v2()).unwrap();
    assert_eq!(store.schema_version(), 2);
    assert_eq!(store.metrics().records_migrated, 0);
    let sizes: Vec<i64> = store
        .scan("file_entry")
        .unwrap()
        .map(|c| c.unwrap().get_attribute("size_bytes").unwrap().as_integer().unwrap())
        .collect();
    assert_eq!(sizes, vec![0, 1, 2, 3]);
    store.close().unwrap();
    assert!(!staged_files_exist(dir.path()));
}
