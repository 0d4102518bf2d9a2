//! Crash point injection for testing durability
//!
//! When `ACSTORE_CRASH_POINT` names a crash point, the process terminates
//! via `std::process::abort()` on reaching it: no cleanup, no unwinding,
//! no destructors. Tests run the store in a child process with the
//! variable set, then reopen the store in the parent.
//!
//! ```ignore
//! use acstore::crash_point::{maybe_crash, points};
//!
//! maybe_crash(points::COMMIT_BEFORE_INDEX_SWAP);
//! ```

use std::sync::OnceLock;

/// Environment variable naming the active crash point
pub const CRASH_POINT_ENV: &str = "ACSTORE_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `ACSTORE_CRASH_POINT` equals `name`.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Aborts the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    /// Record bytes appended to the log, index not yet written
    pub const APPEND_AFTER_WRITE: &str = "append_after_write";
    /// Log synced, new index written to its temp file but not renamed
    pub const COMMIT_BEFORE_INDEX_SWAP: &str = "commit_before_index_swap";
    /// New index renamed into place
    pub const COMMIT_AFTER_INDEX_SWAP: &str = "commit_after_index_swap";
    /// Migrated files staged, canonical data file untouched
    pub const MIGRATION_BEFORE_DATA_SWAP: &str = "migration_before_data_swap";
    /// Migrated data file renamed into place, index not yet swapped
    pub const MIGRATION_BEFORE_INDEX_SWAP: &str = "migration_before_index_swap";

    pub fn all() -> &'static [&'static str] {
        &[
            APPEND_AFTER_WRITE,
            COMMIT_BEFORE_INDEX_SWAP,
            COMMIT_AFTER_INDEX_SWAP,
            MIGRATION_BEFORE_DATA_SWAP,
            MIGRATION_BEFORE_INDEX_SWAP,
        ]
    }
}
