//! In-memory backend
//!
//! Keeps the same visibility rules as the file backend. The committed
//! state is an immutable image that is replaced as a whole on commit, so
//! open handles and running scans keep reading the image they started on.
//!
//! `memory:` stores are private to the backend that created them.
//! `memory:<name>` stores live in a process-wide registry until
//! `MemoryBackend::destroy` is called, so they can be closed and reopened.
//!
//! The writer lock is a weak reference to the holder's liveness token.
//! A handle dropped without `close` leaves the reference dangling; the
//! next acquirer reclaims it as a stale lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use super::header::StoreHeader;
use super::index::{IndexEntry, RecordIndex};
use super::lock::LivenessToken;
use super::{Backend, BackendOptions, LockPolicy, OpenMode, RecordScan, RewriteFn, SerializedRecord};
use crate::container::ContainerIdentifier;
use crate::errors::{StoreError, StoreErrorCode, StoreResult};
use crate::observability::{log_event, Event};

/// Committed contents of a memory store. Index offsets are record positions.
#[derive(Debug)]
struct MemoryImage {
    header: StoreHeader,
    records: Vec<Arc<[u8]>>,
    index: RecordIndex,
    size: u64,
}

impl MemoryImage {
    fn empty(header: StoreHeader) -> Self {
        Self {
            header,
            records: Vec::new(),
            index: RecordIndex::new(),
            size: 0,
        }
    }

    fn record(&self, entry: &IndexEntry) -> StoreResult<Vec<u8>> {
        self.records
            .get(entry.offset as usize)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| {
                StoreError::corrupt_at_offset(
                    entry.offset,
                    format!("record {} missing from memory image", entry.identifier),
                )
            })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    image: Option<Arc<MemoryImage>>,
    holder: Option<Weak<LivenessToken>>,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn registry() -> &'static Mutex<HashMap<String, SharedState>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, SharedState>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Store held in process memory.
pub struct MemoryBackend {
    name: Option<String>,
    state: SharedState,
    options: BackendOptions,
    mode: Option<OpenMode>,
    token: Option<Arc<LivenessToken>>,
    snapshot: Option<Arc<MemoryImage>>,
    pending: RecordIndex,
    pending_records: Vec<Arc<[u8]>>,
    pending_size: u64,
}

impl MemoryBackend {
    fn with_state(name: Option<String>, state: SharedState, options: BackendOptions) -> Self {
        Self {
            name,
            state,
            options,
            mode: None,
            token: None,
            snapshot: None,
            pending: RecordIndex::new(),
            pending_records: Vec::new(),
            pending_size: 0,
        }
    }

    /// A fresh store visible only through this backend and its `shared` handles.
    pub fn anonymous(options: BackendOptions) -> Self {
        Self::with_state(None, Arc::new(Mutex::new(MemoryState::default())), options)
    }

    /// The registered store called `name`, registering it if needed.
    pub fn named(name: &str, options: BackendOptions) -> Self {
        let state = Arc::clone(
            registry()
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MemoryState::default()))),
        );
        Self::with_state(Some(name.to_string()), state, options)
    }

    /// Removes a named store from the registry. Open handles keep their
    /// data; later `named` calls start from an empty store.
    pub fn destroy(name: &str) -> bool {
        registry().lock().remove(name).is_some()
    }

    /// Another unopened handle on the same store.
    pub fn shared(&self) -> Self {
        Self::with_state(self.name.clone(), Arc::clone(&self.state), self.options)
    }

    fn snapshot(&self) -> StoreResult<&Arc<MemoryImage>> {
        self.snapshot.as_ref().ok_or_else(StoreError::store_closed)
    }

    fn ensure_writable(&self, operation: &str) -> StoreResult<()> {
        match self.mode {
            None => Err(StoreError::store_closed()),
            Some(OpenMode::ReadOnly) => Err(StoreError::read_only(operation)),
            Some(_) => Ok(()),
        }
    }

    fn check_capacity(&self, size: u64) -> StoreResult<()> {
        match self.options.max_store_size_bytes {
            Some(limit) if size > limit => Err(StoreError::backend_full(limit, size)),
            _ => Ok(()),
        }
    }

    fn publish(&mut self, image: MemoryImage) {
        let image = Arc::new(image);
        self.state.lock().image = Some(Arc::clone(&image));
        self.snapshot = Some(image);
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_records.clear();
        self.pending_size = 0;
    }
}

impl Backend for MemoryBackend {
    fn location(&self) -> String {
        match &self.name {
            Some(name) => format!("memory:{}", name),
            None => "memory:".to_string(),
        }
    }

    fn exists(&self) -> StoreResult<bool> {
        Ok(self.state.lock().image.is_some())
    }

    fn acquire_exclusive_lock(&mut self, policy: &LockPolicy) -> StoreResult<()> {
        if self.token.is_some() {
            return Ok(());
        }
        let token = Arc::new(LivenessToken::new());
        let started = Instant::now();
        loop {
            let mut state = self.state.lock();
            match state.holder.as_ref().map(|holder| holder.strong_count() > 0) {
                Some(true) => {
                    drop(state);
                    let waited = started.elapsed();
                    if waited >= policy.timeout {
                        return Err(StoreError::lock_timeout(
                            self.location(),
                            waited.as_millis() as u64,
                        ));
                    }
                    thread::sleep(policy.retry_interval.min(policy.timeout - waited));
                    continue;
                }
                Some(false) => log_event(
                    Event::StaleLockReclaimed,
                    &[("lock", &self.location()), ("previous_holder", "dropped handle")],
                ),
                None => {}
            }
            state.holder = Some(Arc::downgrade(&token));
            drop(state);
            self.token = Some(token);
            return Ok(());
        }
    }

    fn release_lock(&mut self) -> StoreResult<()> {
        if let Some(token) = self.token.take() {
            let mut state = self.state.lock();
            let ours = state
                .holder
                .as_ref()
                .map(|holder| Weak::ptr_eq(holder, &Arc::downgrade(&token)))
                .unwrap_or(false);
            if ours {
                state.holder = None;
            }
        }
        Ok(())
    }

    fn create(&mut self, schema_version: u32) -> StoreResult<StoreHeader> {
        if self.exists()? {
            return Err(StoreError::already_exists(self.location()));
        }
        let header = StoreHeader::new(schema_version);
        self.clear_pending();
        self.publish(MemoryImage::empty(header));
        self.mode = Some(OpenMode::Create);
        Ok(header)
    }

    fn open(&mut self, mode: OpenMode) -> StoreResult<StoreHeader> {
        if mode == OpenMode::Create {
            return Err(StoreError::new(
                StoreErrorCode::InvalidTransition,
                "a new store is created with create, not open",
            ));
        }
        let image = self
            .state
            .lock()
            .image
            .clone()
            .ok_or_else(|| StoreError::not_found(format!("no store at {}", self.location())))?;
        let header = image.header;
        self.clear_pending();
        self.snapshot = Some(image);
        self.mode = Some(mode);
        Ok(header)
    }

    fn append(&mut self, record: SerializedRecord) -> StoreResult<u64> {
        self.ensure_writable("append")?;
        if self.contains(&record.identifier) {
            return Err(StoreError::duplicate_identifier(&record.identifier));
        }
        let snapshot = self.snapshot()?;
        let length = u32::try_from(record.bytes.len())
            .map_err(|_| StoreError::encoding("record exceeds the record size limit"))?;
        let offset = (snapshot.records.len() + self.pending_records.len()) as u64;
        let size = snapshot.size + self.pending_size + length as u64;
        self.check_capacity(size)?;

        self.pending.insert(IndexEntry {
            identifier: record.identifier,
            offset,
            length,
        })?;
        self.pending_records.push(Arc::from(record.bytes));
        self.pending_size += length as u64;
        Ok(offset)
    }

    fn read(&self, identifier: &ContainerIdentifier) -> StoreResult<Vec<u8>> {
        let snapshot = self.snapshot()?;
        let entry = snapshot
            .index
            .get(identifier)
            .ok_or_else(|| StoreError::not_found(format!("container {}", identifier)))?;
        snapshot.record(entry)
    }

    fn read_at(&self, offset: u64) -> StoreResult<Vec<u8>> {
        let snapshot = self.snapshot()?;
        let entry = snapshot
            .index
            .get_at(offset)
            .ok_or_else(|| StoreError::not_found(format!("no committed record at offset {}", offset)))?;
        snapshot.record(entry)
    }

    fn scan(&self, type_name: &str) -> StoreResult<RecordScan<'_>> {
        let image = Arc::clone(self.snapshot()?);
        let entries = image.index.entries_of_type(type_name);
        Ok(Box::new(entries.into_iter().map(move |entry| image.record(&entry))))
    }

    fn contains(&self, identifier: &ContainerIdentifier) -> bool {
        self.pending.contains(identifier)
            || self
                .snapshot
                .as_ref()
                .map(|image| image.index.contains(identifier))
                .unwrap_or(false)
    }

    fn last_sequence_number(&self, type_name: &str) -> u64 {
        let committed = self
            .snapshot
            .as_ref()
            .map(|image| image.index.last_sequence_number(type_name))
            .unwrap_or(0);
        committed.max(self.pending.last_sequence_number(type_name))
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn count_committed(&self, type_name: &str) -> usize {
        self.snapshot
            .as_ref()
            .map(|image| image.index.count(type_name))
            .unwrap_or(0)
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.ensure_writable("commit")?;
        let current = Arc::clone(self.snapshot()?);

        let mut index = current.index.clone();
        index.extend(&self.pending)?;
        let mut records = current.records.clone();
        records.extend(self.pending_records.iter().cloned());

        self.publish(MemoryImage {
            header: current.header,
            records,
            index,
            size: current.size + self.pending_size,
        });
        self.clear_pending();
        Ok(())
    }

    fn rewrite(&mut self, schema_version: u32, transform: &mut RewriteFn<'_>) -> StoreResult<StoreHeader> {
        self.ensure_writable("migrate")?;
        if !self.pending.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::InvalidMigration,
                "uncommitted records must be committed before a migration",
            ));
        }
        let current = Arc::clone(self.snapshot()?);
        let header = current.header.next_generation(schema_version);

        let mut image = MemoryImage::empty(header);
        for entry in current.index.entries() {
            let migrated = transform(&current.record(entry)?)?;
            let length = u32::try_from(migrated.len())
                .map_err(|_| StoreError::encoding("migrated record exceeds the record size limit"))?;
            self.check_capacity(image.size + length as u64)?;

            image.index.insert(IndexEntry {
                identifier: entry.identifier.clone(),
                offset: image.records.len() as u64,
                length,
            })?;
            image.records.push(Arc::from(migrated));
            image.size += length as u64;
        }

        self.publish(image);
        Ok(header)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.mode = None;
        self.snapshot = None;
        self.clear_pending();
        self.release_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(seq: u64, bytes: &[u8]) -> SerializedRecord {
        SerializedRecord::new(ContainerIdentifier::new("event", seq), bytes.to_vec())
    }

    fn quick() -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(50),
            retry_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_anonymous_stores_are_private() {
        let mut a = MemoryBackend::anonymous(BackendOptions::default());
        a.create(1).unwrap();
        let b = MemoryBackend::anonymous(BackendOptions::default());
        assert!(!b.exists().unwrap());
        assert_eq!(a.location(), "memory:");
    }

    #[test]
    fn test_commit_visibility() {
        let mut backend = MemoryBackend::anonymous(BackendOptions::default());
        backend.create(1).unwrap();
        backend.append(record(1, b"a")).unwrap();
        let id = ContainerIdentifier::new("event", 1);
        assert!(backend.contains(&id));
        assert_eq!(backend.read(&id).unwrap_err().code(), StoreErrorCode::NotFound);

        backend.commit().unwrap();
        assert_eq!(backend.read(&id).unwrap(), b"a");
        assert_eq!(backend.read_at(0).unwrap(), b"a");
    }

    #[test]
    fn test_close_drops_pending() {
        let mut backend = MemoryBackend::anonymous(BackendOptions::default());
        backend.create(1).unwrap();
        backend.append(record(1, b"a")).unwrap();
        backend.commit().unwrap();
        backend.append(record(2, b"b")).unwrap();
        backend.close().unwrap();

        backend.open(OpenMode::ReadOnly).unwrap();
        assert_eq!(backend.count_committed("event"), 1);
        assert_eq!(backend.last_sequence_number("event"), 1);
    }

    #[test]
    fn test_scan_keeps_starting_image() {
        let mut backend = MemoryBackend::anonymous(BackendOptions::default());
        backend.create(1).unwrap();
        backend.append(record(1, b"a")).unwrap();
        backend.commit().unwrap();

        let mut reader = backend.shared();
        reader.open(OpenMode::ReadOnly).unwrap();
        let scan = reader.scan("event").unwrap();

        backend.append(record(2, b"b")).unwrap();
        backend.commit().unwrap();

        assert_eq!(scan.count(), 1);
        assert_eq!(backend.scan("event").unwrap().count(), 2);
    }

    #[test]
    fn test_named_store_survives_reopen() {
        let name = format!("survives-{}", uuid::Uuid::new_v4());
        {
            let mut backend = MemoryBackend::named(&name, BackendOptions::default());
            backend.create(1).unwrap();
            backend.append(record(1, b"a")).unwrap();
            backend.commit().unwrap();
            backend.close().unwrap();
        }
        let mut backend = MemoryBackend::named(&name, BackendOptions::default());
        backend.open(OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.count_committed("event"), 1);
        assert_eq!(backend.location(), format!("memory:{}", name));

        assert!(MemoryBackend::destroy(&name));
        assert!(!MemoryBackend::named(&name, BackendOptions::default()).exists().unwrap());
    }

    #[test]
    fn test_lock_contention_and_stale_reclaim() {
        let mut first = MemoryBackend::anonymous(BackendOptions::default());
        first.acquire_exclusive_lock(&quick()).unwrap();

        let mut second = first.shared();
        let err = second.acquire_exclusive_lock(&quick()).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::LockTimeout);

        first.release_lock().unwrap();
        second.acquire_exclusive_lock(&quick()).unwrap();

        let mut third = second.shared();
        drop(second);
        third.acquire_exclusive_lock(&quick()).unwrap();
    }

    #[test]
    fn test_capacity_counts_record_bytes() {
        let options = BackendOptions {
            max_store_size_bytes: Some(4),
            sync_on_commit: true,
        };
        let mut backend = MemoryBackend::anonymous(options);
        backend.create(1).unwrap();
        backend.append(record(1, b"abc")).unwrap();
        let err = backend.append(record(2, b"de")).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::BackendFull);
    }

    #[test]
    fn test_rewrite_replaces_image() {
        let mut backend = MemoryBackend::anonymous(BackendOptions::default());
        backend.create(1).unwrap();
        backend.append(record(1, b"a")).unwrap();
        backend.append(record(2, b"b")).unwrap();
        backend.commit().unwrap();

        let header = backend
            .rewrite(2, &mut |bytes: &[u8]| Ok(bytes.to_ascii_uppercase()))
            .unwrap();
        assert_eq!(header.schema_version, 2);
        let scanned: Vec<Vec<u8>> = backend.scan("event").unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(scanned, vec![b"A".to_vec(), b"B".to_vec()]);

        let failed = backend.rewrite(3, &mut |_: &[u8]| Err(StoreError::invalid_migration("no")));
        assert!(failed.is_err());
        assert_eq!(backend.read_at(0).unwrap(), b"A");
    }
}
