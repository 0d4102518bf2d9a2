//! Commit crash scenarios
//!
//! - Crash before the index rename: the commit never happened
//! - Crash after the index rename: the commit is complete

use acstore::crash_point::points;
use acstore::{OpenMode, Store};
use tempfile::TempDir;

use crate::crash::{
    assert_crashed_at, child_data_dir, committed_count, file_entry, populate, run_child, schema_v1,
    store_location,
};

const CHILD_BEFORE_SWAP: &str = "crash::scenarios::commit::child_commit_before_index_swap";
const CHILD_AFTER_SWAP: &str = "crash::scenarios::commit::child_commit_after_index_swap";

fn write_and_commit_two() {
    let Some(data_dir) = child_data_dir() else {
        return;
    };
    let schema = schema_v1();
    let mut store = Store::open(&store_location(&data_dir), OpenMode::ReadWrite, schema.clone()).unwrap();
    store.write(&mut file_entry(&schema, 10)).unwrap();
    store.write(&mut file_entry(&schema, 11)).unwrap();
    store.commit().unwrap();
    panic!("crash point not reached");
}

#[test]
fn child_commit_before_index_swap() {
    write_and_commit_two();
}

#[test]
fn child_commit_after_index_swap() {
    write_and_commit_two();
}

#[test]
fn test_crash_before_index_swap_loses_commit() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 3);

    let result = run_child(CHILD_BEFORE_SWAP, points::COMMIT_BEFORE_INDEX_SWAP, dir.path());
    assert_crashed_at(&result, points::COMMIT_BEFORE_INDEX_SWAP);

    assert_eq!(committed_count(dir.path(), schema_v1()), 3);

    // The leftover temp index does not get in the way of the next commit
    let schema = schema_v1();
    let mut store = Store::open(&store_location(dir.path()), OpenMode::ReadWrite, schema.clone()).unwrap();
    store.write(&mut file_entry(&schema, 3)).unwrap();
    store.close().unwrap();
    assert_eq!(committed_count(dir.path(), schema_v1()), 4);
}

#[test]
fn test_crash_after_index_swap_keeps_commit() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), 3);

    let result = run_child(CHILD_AFTER_SWAP, points::COMMIT_AFTER_INDEX_SWAP, dir.path());
    assert_crashed_at(&result, points::COMMIT_AFTER_INDEX_SWAP);

    assert_eq!(committed_count(dir.path(), schema_v1()), 5);

    // The dead child's lock token is reclaimed
    let store = Store::open(&store_location(dir.path()), OpenMode::ReadWrite, schema_v1()).unwrap();
    assert_eq!(store.count("file_entry").unwrap(), 5);
}
