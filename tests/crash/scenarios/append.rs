//! Append crash scenarios
//!
//! - Crash after record bytes reach the log, before any commit: the record
//!   is never visible and the tail is discarded on the next read-write open

use std::fs;

use acstore::crash_point::points;
use acstore::{OpenMode, Store};
use tempfile::TempDir;

use crate::crash::{
    assert_crashed_at, child_data_dir, committed_count, file_entry, populate, run_child, schema_v1,
    store_location, store_path,
};

const CHILD: &str = "crash::scenarios::append::child_append_after_write";

#[test]
fn child_append_after_write() {
    let Some(data_dir) = child_data_dir() else {
        return;
    };
    let schema = schema_v1();
    let mut store = Store::open(&store_location(&data_dir), OpenMode::ReadWrite, schema.clone()).unwrap();
    store.write(&mut file_entry(&schema, 99)).unwrap();
    panic!("crash point not reached");
}

#[test]
fn test_crash_after_append_keeps_committed_state() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 3);
    let committed_len = fs::metadata(store_path(dir.path())).unwrap().len();

    let result = run_child(CHILD, points::APPEND_AFTER_WRITE, dir.path());
    assert_crashed_at(&result, points::APPEND_AFTER_WRITE);
    assert!(fs::metadata(store_path(dir.path())).unwrap().len() > committed_len);

    // Readers ignore the dangling tail
    assert_eq!(committed_count(dir.path(), schema_v1()), 3);

    // A writer discards it and continues the sequence
    let schema = schema_v1();
    let mut store = Store::open(&store_location(dir.path()), OpenMode::ReadWrite, schema.clone()).unwrap();
    assert_eq!(fs::metadata(store_path(dir.path())).unwrap().len(), committed_len);
    let id = store.write(&mut file_entry(&schema, 3)).unwrap();
    assert_eq!(id.sequence_number(), 4);
    store.close().unwrap();

    assert_eq!(committed_count(dir.path(), schema_v1()), 4);
}
