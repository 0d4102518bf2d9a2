//! File backend
//!
//! A store at `<path>` consists of:
//!
//! - `<path>`: store header followed by the append-only record log
//! - `<path>.index`: the committed index, replaced on every commit by
//!   writing `<path>.index.tmp`, syncing it and renaming it into place
//! - `<path>.lock`: the writer lock
//!
//! The index records the committed log end. Bytes past it belong to
//! records that were appended but never committed; a read-write open
//! truncates them and a read-only open ignores them.
//!
//! A migration writes `<path>.migrate` and `<path>.migrate.index` under a
//! new generation, renames the data file into place and then the index.
//! An open that finds staged files completes the swap if the data file
//! already carries the staged generation, and deletes them otherwise.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::header::{StoreHeader, HEADER_SIZE};
use super::index::{IndexEntry, IndexHeader, RecordIndex};
use super::lock::FileLock;
use super::{Backend, BackendOptions, LockPolicy, OpenMode, RecordScan, RewriteFn, SerializedRecord};
use crate::container::ContainerIdentifier;
use crate::crash_point::{maybe_crash, points};
use crate::errors::{StoreError, StoreErrorCode, StoreResult};
use crate::observability::{log_event, Event};

/// Store persisted in a data file plus an index file.
pub struct FileBackend {
    path: PathBuf,
    options: BackendOptions,
    mode: Option<OpenMode>,
    lock: Option<FileLock>,
    header: Option<StoreHeader>,
    data: Option<Mutex<File>>,
    committed: RecordIndex,
    committed_end: u64,
    pending: RecordIndex,
    log_end: u64,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Makes a rename or create inside the parent directory of `path` durable.
fn sync_parent_dir(path: &Path) -> StoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| StoreError::io(format!("failed to fsync directory {}", parent.display()), e))
}

/// Writes `bytes` to `path`, replacing any previous content.
fn write_file(path: &Path, bytes: &[u8], sync: bool) -> StoreResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| StoreError::io(format!("failed to create {}", path.display()), e))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
    if sync {
        file.sync_all()
            .map_err(|e| StoreError::io(format!("failed to fsync {}", path.display()), e))?;
    }
    Ok(())
}

fn rename_durable(from: &Path, to: &Path) -> StoreResult<()> {
    fs::rename(from, to).map_err(|e| {
        StoreError::io(
            format!("failed to rename {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    sync_parent_dir(to)
}

fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(format!("failed to remove {}", path.display()), e)),
    }
}

fn read_header(file: &mut File, path: &Path) -> StoreResult<StoreHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_exact(&mut buf))
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                StoreError::corrupt_at_offset(0, format!("{} has no complete header", path.display()))
            }
            _ => StoreError::io(format!("failed to read header of {}", path.display()), e),
        })?;
    StoreHeader::decode(&buf)
}

fn read_index_file(path: &Path) -> StoreResult<Option<(IndexHeader, RecordIndex)>> {
    match fs::read(path) {
        Ok(bytes) => RecordIndex::decode(&bytes).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(format!("failed to read {}", path.display()), e)),
    }
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, options: BackendOptions) -> Self {
        Self {
            path: path.into(),
            options,
            mode: None,
            lock: None,
            header: None,
            data: None,
            committed: RecordIndex::new(),
            committed_end: 0,
            pending: RecordIndex::new(),
            log_end: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index_path(&self) -> PathBuf {
        with_suffix(&self.path, ".index")
    }

    pub fn lock_path(&self) -> PathBuf {
        FileLock::lock_path(&self.path)
    }

    fn staged_data_path(&self) -> PathBuf {
        with_suffix(&self.path, ".migrate")
    }

    fn staged_index_path(&self) -> PathBuf {
        with_suffix(&self.path, ".migrate.index")
    }

    fn not_open() -> StoreError {
        StoreError::store_closed()
    }

    fn header(&self) -> StoreResult<StoreHeader> {
        self.header.ok_or_else(Self::not_open)
    }

    fn ensure_writable(&self, operation: &str) -> StoreResult<()> {
        match self.mode {
            None => Err(Self::not_open()),
            Some(OpenMode::ReadOnly) => Err(StoreError::read_only(operation)),
            Some(_) => Ok(()),
        }
    }

    fn data_mut(&mut self) -> StoreResult<&mut File> {
        self.data
            .as_mut()
            .map(|data| data.get_mut())
            .ok_or_else(Self::not_open)
    }

    fn read_entry(&self, entry: &IndexEntry) -> StoreResult<Vec<u8>> {
        let data = self.data.as_ref().ok_or_else(Self::not_open)?;
        let mut file = data.lock();
        let mut buf = vec![0u8; entry.length as usize];
        file.seek(SeekFrom::Start(entry.offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => StoreError::corrupt_at_offset(
                    entry.offset,
                    format!("record {} extends past the end of the log", entry.identifier),
                ),
                _ => StoreError::io(format!("failed to read record {}", entry.identifier), e),
            })?;
        Ok(buf)
    }

    fn index_header(&self, header: &StoreHeader, committed_log_end: u64) -> IndexHeader {
        IndexHeader {
            generation: header.generation,
            schema_version: header.schema_version,
            committed_log_end,
        }
    }

    fn check_capacity(&self, end: u64) -> StoreResult<()> {
        match self.options.max_store_size_bytes {
            Some(limit) if end > limit => Err(StoreError::backend_full(limit, end)),
            _ => Ok(()),
        }
    }

    /// Completes or discards a migration interrupted before its last rename.
    fn recover_staged_migration(&self) -> StoreResult<()> {
        let staged_data = self.staged_data_path();
        let staged_index = self.staged_index_path();
        if !staged_index.exists() {
            if staged_data.exists() {
                remove_if_exists(&staged_data)?;
                log_event(
                    Event::MigrationDiscarded,
                    &[("location", &self.path.display().to_string())],
                );
            }
            return Ok(());
        }

        let mut data = File::open(&self.path).map_err(|e| {
            StoreError::io(format!("failed to open {}", self.path.display()), e)
        })?;
        let data_header = read_header(&mut data, &self.path)?;

        let staged = read_index_file(&staged_index).ok().flatten();
        match staged {
            Some((header, _)) if header.generation == data_header.generation => {
                rename_durable(&staged_index, &self.index_path())?;
                log_event(
                    Event::MigrationRolledForward,
                    &[
                        ("location", &self.path.display().to_string()),
                        ("schema_version", &data_header.schema_version.to_string()),
                    ],
                );
            }
            _ => {
                remove_if_exists(&staged_data)?;
                remove_if_exists(&staged_index)?;
                log_event(
                    Event::MigrationDiscarded,
                    &[("location", &self.path.display().to_string())],
                );
            }
        }
        Ok(())
    }

    /// Index path a read-only open must use: a staged index already
    /// matching the data file wins over the canonical one.
    fn read_only_index_path(&self, header: &StoreHeader) -> PathBuf {
        let staged_index = self.staged_index_path();
        if let Ok(Some((staged, _))) = read_index_file(&staged_index) {
            if staged.generation == header.generation {
                return staged_index;
            }
        }
        self.index_path()
    }

    fn reset(&mut self) {
        self.mode = None;
        self.header = None;
        self.data = None;
        self.committed.clear();
        self.pending.clear();
        self.committed_end = 0;
        self.log_end = 0;
    }

    fn build_staged(
        &self,
        header: &StoreHeader,
        transform: &mut RewriteFn<'_>,
    ) -> StoreResult<(RecordIndex, u64)> {
        let staged_data = self.staged_data_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staged_data)
            .map_err(|e| StoreError::io(format!("failed to create {}", staged_data.display()), e))?;
        file.write_all(&header.encode())
            .map_err(|e| StoreError::io("failed to write migrated header", e))?;

        let mut index = RecordIndex::new();
        let mut offset = HEADER_SIZE as u64;
        for entry in self.committed.entries() {
            let bytes = self.read_entry(entry)?;
            let migrated = transform(&bytes)?;
            let length = u32::try_from(migrated.len())
                .map_err(|_| StoreError::encoding("migrated record exceeds the record size limit"))?;
            self.check_capacity(offset + length as u64)?;

            file.write_all(&migrated)
                .map_err(|e| StoreError::io(format!("failed to write migrated record {}", entry.identifier), e))?;
            index.insert(IndexEntry {
                identifier: entry.identifier.clone(),
                offset,
                length,
            })?;
            offset += length as u64;
        }

        file.sync_all()
            .map_err(|e| StoreError::io(format!("failed to fsync {}", staged_data.display()), e))?;

        let index_bytes = index.encode(&self.index_header(header, offset))?;
        write_file(&self.staged_index_path(), &index_bytes, true)?;
        Ok((index, offset))
    }
}

impl Backend for FileBackend {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> StoreResult<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(format!("failed to stat {}", self.path.display()), e)),
        }
    }

    fn acquire_exclusive_lock(&mut self, policy: &LockPolicy) -> StoreResult<()> {
        if self.lock.is_none() {
            self.lock = Some(FileLock::acquire(&self.lock_path(), policy)?);
        }
        Ok(())
    }

    fn release_lock(&mut self) -> StoreResult<()> {
        match self.lock.take() {
            Some(mut lock) => lock.release(),
            None => Ok(()),
        }
    }

    fn create(&mut self, schema_version: u32) -> StoreResult<StoreHeader> {
        if self.exists()? {
            return Err(StoreError::already_exists(self.path.display()));
        }

        let header = StoreHeader::new(schema_version);
        let staged = with_suffix(&self.path, ".tmp");
        write_file(&staged, &header.encode(), true)?;

        let index_bytes = RecordIndex::new().encode(&self.index_header(&header, HEADER_SIZE as u64))?;
        let index_tmp = with_suffix(&self.index_path(), ".tmp");
        write_file(&index_tmp, &index_bytes, true)?;
        rename_durable(&index_tmp, &self.index_path())?;

        // The data file appears last: a store exists only once it has an index
        rename_durable(&staged, &self.path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(format!("failed to open {}", self.path.display()), e))?;

        self.reset();
        self.mode = Some(OpenMode::Create);
        self.header = Some(header);
        self.data = Some(Mutex::new(file));
        self.committed_end = HEADER_SIZE as u64;
        self.log_end = HEADER_SIZE as u64;
        Ok(header)
    }

    fn open(&mut self, mode: OpenMode) -> StoreResult<StoreHeader> {
        if mode == OpenMode::Create {
            return Err(StoreError::new(
                StoreErrorCode::InvalidTransition,
                "a new store is created with create, not open",
            ));
        }
        if !self.exists()? {
            return Err(StoreError::not_found(format!("no store at {}", self.path.display())));
        }
        if mode.is_writable() {
            self.recover_staged_migration()?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .open(&self.path)
            .map_err(|e| StoreError::io(format!("failed to open {}", self.path.display()), e))?;
        let header = read_header(&mut file, &self.path)?;

        let index_path = if mode.is_writable() {
            self.index_path()
        } else {
            self.read_only_index_path(&header)
        };
        let (index_header, index) = read_index_file(&index_path)?.ok_or_else(|| {
            StoreError::corrupt_record(format!("index file {} is missing", index_path.display()))
        })?;

        if index_header.generation != header.generation
            || index_header.schema_version != header.schema_version
        {
            return Err(StoreError::corrupt_record(format!(
                "index {} does not describe data file {}",
                index_path.display(),
                self.path.display()
            )));
        }

        let file_len = file
            .metadata()
            .map_err(|e| StoreError::io(format!("failed to stat {}", self.path.display()), e))?
            .len();
        let committed_end = index_header.committed_log_end;
        if committed_end < HEADER_SIZE as u64 || committed_end > file_len {
            return Err(StoreError::corrupt_at_offset(
                committed_end,
                format!("committed log end is outside the data file of {} bytes", file_len),
            ));
        }

        if file_len > committed_end {
            let tail = (file_len - committed_end).to_string();
            if mode.is_writable() {
                file.set_len(committed_end)
                    .and_then(|_| file.sync_all())
                    .map_err(|e| StoreError::io("failed to discard uncommitted tail", e))?;
            }
            log_event(
                Event::DanglingTailDiscarded,
                &[
                    ("location", &self.path.display().to_string()),
                    ("bytes", &tail),
                    ("mode", mode.as_str()),
                ],
            );
        }

        self.reset();
        self.mode = Some(mode);
        self.header = Some(header);
        self.data = Some(Mutex::new(file));
        self.committed = index;
        self.committed_end = committed_end;
        self.log_end = committed_end;
        Ok(header)
    }

    fn append(&mut self, record: SerializedRecord) -> StoreResult<u64> {
        self.ensure_writable("append")?;
        if self.contains(&record.identifier) {
            return Err(StoreError::duplicate_identifier(&record.identifier));
        }
        let length = u32::try_from(record.bytes.len())
            .map_err(|_| StoreError::encoding("record exceeds the record size limit"))?;
        let offset = self.log_end;
        self.check_capacity(offset + length as u64)?;

        let file = self.data_mut()?;
        let written = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(&record.bytes));
        if let Err(e) = written {
            let _ = file.set_len(offset);
            return Err(StoreError::io(
                format!("failed to append record {}", record.identifier),
                e,
            ));
        }
        maybe_crash(points::APPEND_AFTER_WRITE);

        self.pending.insert(IndexEntry {
            identifier: record.identifier,
            offset,
            length,
        })?;
        self.log_end = offset + length as u64;
        Ok(offset)
    }

    fn read(&self, identifier: &ContainerIdentifier) -> StoreResult<Vec<u8>> {
        let entry = self
            .committed
            .get(identifier)
            .ok_or_else(|| StoreError::not_found(format!("container {}", identifier)))?;
        self.read_entry(entry)
    }

    fn read_at(&self, offset: u64) -> StoreResult<Vec<u8>> {
        let entry = self
            .committed
            .get_at(offset)
            .ok_or_else(|| StoreError::not_found(format!("no committed record at offset {}", offset)))?;
        self.read_entry(entry)
    }

    fn scan(&self, type_name: &str) -> StoreResult<RecordScan<'_>> {
        if self.data.is_none() {
            return Err(Self::not_open());
        }
        let entries = self.committed.entries_of_type(type_name);
        Ok(Box::new(entries.into_iter().map(move |entry| self.read_entry(&entry))))
    }

    fn contains(&self, identifier: &ContainerIdentifier) -> bool {
        self.committed.contains(identifier) || self.pending.contains(identifier)
    }

    fn last_sequence_number(&self, type_name: &str) -> u64 {
        self.committed
            .last_sequence_number(type_name)
            .max(self.pending.last_sequence_number(type_name))
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn count_committed(&self, type_name: &str) -> usize {
        self.committed.count(type_name)
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.ensure_writable("commit")?;
        let header = self.header()?;
        let sync = self.options.sync_on_commit;

        if sync {
            self.data_mut()?
                .sync_data()
                .map_err(|e| StoreError::io("failed to fsync record log", e))?;
        }

        let mut next = self.committed.clone();
        next.extend(&self.pending)?;
        let index_bytes = next.encode(&self.index_header(&header, self.log_end))?;

        let index_path = self.index_path();
        let index_tmp = with_suffix(&index_path, ".tmp");
        write_file(&index_tmp, &index_bytes, sync)?;
        maybe_crash(points::COMMIT_BEFORE_INDEX_SWAP);
        rename_durable(&index_tmp, &index_path)?;
        maybe_crash(points::COMMIT_AFTER_INDEX_SWAP);

        self.committed = next;
        self.committed_end = self.log_end;
        self.pending.clear();
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
        let header = self.header()?.next_generation(schema_version);

        let staged_data = self.staged_data_path();
        let staged_index = self.staged_index_path();
        remove_if_exists(&staged_data)?;
        remove_if_exists(&staged_index)?;

        let (index, log_end) = match self.build_staged(&header, transform) {
            Ok(built) => built,
            Err(e) => {
                let _ = remove_if_exists(&staged_data);
                let _ = remove_if_exists(&staged_index);
                return Err(e);
            }
        };

        maybe_crash(points::MIGRATION_BEFORE_DATA_SWAP);
        rename_durable(&staged_data, &self.path)?;
        maybe_crash(points::MIGRATION_BEFORE_INDEX_SWAP);
        rename_durable(&staged_index, &self.index_path())?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(format!("failed to reopen {}", self.path.display()), e))?;

        self.header = Some(header);
        self.data = Some(Mutex::new(file));
        self.committed = index;
        self.committed_end = log_end;
        self.log_end = log_end;
        Ok(header)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.reset();
        self.release_lock()
    }
}
