//! Storage backends
//!
//! A backend persists framed records and publishes them through an index.
//! Records become visible only when `commit` publishes the index; bytes
//! appended but never committed are ignored by every reader and discarded
//! on the next read-write open.
//!
//! # Variants
//!
//! - `FileBackend`: a data file (header + append-only record log) and an
//!   index file rewritten on commit via write-to-temp-then-rename
//! - `MemoryBackend`: the same semantics held in process memory
//!
//! The variant is selected by the location descriptor:
//!
//! | Location              | Backend                           |
//! |-----------------------|-----------------------------------|
//! | `memory:`             | fresh anonymous in-memory store   |
//! | `memory:<name>`       | named in-memory store (process)   |
//! | `file://<path>`       | file store at `<path>`            |
//! | `<path>`              | file store at `<path>`            |

mod file;
mod header;
mod index;
mod lock;
mod memory;

pub use file::FileBackend;
pub use header::{StoreHeader, FORMAT_VERSION, HEADER_SIZE, STORE_MAGIC};
pub use index::{IndexEntry, IndexHeader, RecordIndex};
pub use lock::{FileLock, LivenessToken};
pub use memory::MemoryBackend;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::container::ContainerIdentifier;
use crate::errors::{StoreError, StoreResult};

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new store; fails if one exists
    Create,
    /// Open an existing store for reading and writing
    ReadWrite,
    /// Open an existing store for reading only
    ReadOnly,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Create => "create",
            OpenMode::ReadWrite => "read-write",
            OpenMode::ReadOnly => "read-only",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounded wait for the exclusive lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// Backend settings derived from the store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// Cap on the total size of the record log
    pub max_store_size_bytes: Option<u64>,
    /// fsync data and index on commit
    pub sync_on_commit: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            max_store_size_bytes: None,
            sync_on_commit: true,
        }
    }
}

/// A framed record together with the identifier it is indexed under.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedRecord {
    pub identifier: ContainerIdentifier,
    pub bytes: Vec<u8>,
}

impl SerializedRecord {
    pub fn new(identifier: ContainerIdentifier, bytes: Vec<u8>) -> Self {
        Self { identifier, bytes }
    }
}

/// Lazy sequence of committed record bytes, in write order.
pub type RecordScan<'a> = Box<dyn Iterator<Item = StoreResult<Vec<u8>>> + 'a>;

/// Record transformation applied by `Backend::rewrite`.
pub type RewriteFn<'a> = dyn FnMut(&[u8]) -> StoreResult<Vec<u8>> + 'a;

/// Storage capabilities required by the store.
pub trait Backend: Send {
    /// Location descriptor this backend was opened from
    fn location(&self) -> String;

    /// Returns true if a store exists at the location.
    fn exists(&self) -> StoreResult<bool>;

    /// Takes the exclusive writer lock, waiting at most `policy.timeout`.
    fn acquire_exclusive_lock(&mut self, policy: &LockPolicy) -> StoreResult<()>;

    /// Releases the writer lock if held.
    fn release_lock(&mut self) -> StoreResult<()>;

    /// Creates an empty store tagged with `schema_version`.
    fn create(&mut self, schema_version: u32) -> StoreResult<StoreHeader>;

    /// Opens an existing store and loads its committed index.
    fn open(&mut self, mode: OpenMode) -> StoreResult<StoreHeader>;

    /// Appends a record. Not visible until `commit`.
    fn append(&mut self, record: SerializedRecord) -> StoreResult<u64>;

    /// Reads a committed record by identifier.
    fn read(&self, identifier: &ContainerIdentifier) -> StoreResult<Vec<u8>>;

    /// Reads the committed record starting at `offset`.
    fn read_at(&self, offset: u64) -> StoreResult<Vec<u8>>;

    /// Scans the committed records of a type, in write order. Records
    /// committed after the scan started are not returned.
    fn scan(&self, type_name: &str) -> StoreResult<RecordScan<'_>>;

    /// True if the identifier is committed or pending.
    fn contains(&self, identifier: &ContainerIdentifier) -> bool;

    /// Largest sequence number used for a type, committed or pending.
    fn last_sequence_number(&self, type_name: &str) -> u64;

    /// Number of appended but uncommitted records
    fn pending_count(&self) -> usize;

    /// Number of committed records of a type
    fn count_committed(&self, type_name: &str) -> usize;

    /// Publishes all pending records atomically.
    fn commit(&mut self) -> StoreResult<()>;

    /// Rewrites every committed record through `transform` into a new
    /// region tagged with `schema_version`, then swaps it in atomically.
    /// On error the canonical store is left untouched.
    fn rewrite(&mut self, schema_version: u32, transform: &mut RewriteFn<'_>) -> StoreResult<StoreHeader>;

    /// Releases the lock and any handles. Pending records are dropped.
    fn close(&mut self) -> StoreResult<()>;
}

/// A parsed location descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    /// `None` is an anonymous store private to one backend
    Memory(Option<String>),
}

impl Location {
    const MEMORY_SCHEME: &'static str = "memory:";
    const FILE_SCHEME: &'static str = "file://";

    pub fn parse(location: &str) -> StoreResult<Self> {
        if let Some(name) = location.strip_prefix(Self::MEMORY_SCHEME) {
            if name.is_empty() {
                return Ok(Location::Memory(None));
            }
            return Ok(Location::Memory(Some(name.to_string())));
        }

        let path = location.strip_prefix(Self::FILE_SCHEME).unwrap_or(location);
        if path.is_empty() {
            return Err(StoreError::invalid_location(format!(
                "location '{}' does not name a file",
                location
            )));
        }
        if path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR) {
            return Err(StoreError::invalid_location(format!(
                "location '{}' names a directory, not a store file",
                location
            )));
        }
        Ok(Location::File(PathBuf::from(path)))
    }

    /// Instantiates the backend for this location.
    pub fn into_backend(self, options: BackendOptions) -> Box<dyn Backend> {
        match self {
            Location::File(path) => Box::new(FileBackend::new(path, options)),
            Location::Memory(None) => Box::new(MemoryBackend::anonymous(options)),
            Location::Memory(Some(name)) => Box::new(MemoryBackend::named(&name, options)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Memory(None) => write!(f, "{}", Self::MEMORY_SCHEME),
            Location::Memory(Some(name)) => write!(f, "{}{}", Self::MEMORY_SCHEME, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreErrorCode;

    #[test]
    fn test_parse_locations() {
        assert_eq!(Location::parse("memory:").unwrap(), Location::Memory(None));
        assert_eq!(
            Location::parse("memory:case-17").unwrap(),
            Location::Memory(Some("case-17".to_string()))
        );
        assert_eq!(
            Location::parse("file:///cases/17.acs").unwrap(),
            Location::File(PathBuf::from("/cases/17.acs"))
        );
        assert_eq!(
            Location::parse("evidence.acs").unwrap(),
            Location::File(PathBuf::from("evidence.acs"))
        );
    }

    #[test]
    fn test_invalid_locations() {
        for location in ["", "file://", "/cases/"] {
            let err = Location::parse(location).unwrap_err();
            assert_eq!(err.code(), StoreErrorCode::InvalidLocation, "{}", location);
        }
    }

    #[test]
    fn test_location_display_roundtrip() {
        for location in ["memory:", "memory:x", "/tmp/a.acs"] {
            assert_eq!(Location::parse(location).unwrap().to_string(), location);
        }
    }

    #[test]
    fn test_open_mode() {
        assert!(OpenMode::Create.is_writable());
        assert!(OpenMode::ReadWrite.is_writable());
        assert!(!OpenMode::ReadOnly.is_writable());
        assert_eq!(OpenMode::ReadOnly.to_string(), "read-only");
    }
}
