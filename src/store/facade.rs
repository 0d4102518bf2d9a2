//! The store façade
//!
//! Binds a backend, a schema and a version manager into the consumer
//! interface: open, write, read, scan, commit, close.
//!
//! # Open sequence
//!
//! 1. Parse the location and instantiate its backend
//! 2. Check existence against the open mode
//! 3. Take the writer lock (create and read-write only)
//! 4. Read the header and validate its schema version
//! 5. Migrate the store if it is older (read-write only), else serve it
//!
//! Any failure releases the lock before the error is returned.
//!
//! A read-only open of an older store leaves it untouched and upgrades each
//! record in memory as it is read.

use std::sync::Arc;

use parking_lot::Mutex;

use super::config::StoreConfig;
use crate::backend::{Backend, Location, OpenMode, RecordScan, SerializedRecord};
use crate::codec::{self, record_schema_version};
use crate::container::{AttributeContainer, ContainerIdentifier, FilterExpression};
use crate::errors::{StoreError, StoreResult};
use crate::observability::{
    log_event, Event, MetricsSnapshot, ObservationScope, StorageProfiler, StoreMetrics,
};
use crate::schema::{Schema, SchemaVersionManager, VersionState};

const WRITE_PROFILE: &str = "write";
const READ_PROFILE: &str = "read";

/// An open attribute container store.
pub struct Store {
    backend: Box<dyn Backend>,
    schema: Arc<Schema>,
    config: StoreConfig,
    mode: OpenMode,
    location: String,
    schema_version: u32,
    versions: SchemaVersionManager,
    metrics: StoreMetrics,
    profiler: Option<Mutex<StorageProfiler>>,
    closed: bool,
}

impl Store {
    /// Opens the store at `location` with the default configuration.
    pub fn open(location: &str, mode: OpenMode, schema: impl Into<Arc<Schema>>) -> StoreResult<Self> {
        Self::open_with_config(location, mode, schema, StoreConfig::default())
    }

    pub fn open_with_config(
        location: &str,
        mode: OpenMode,
        schema: impl Into<Arc<Schema>>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        let backend = Location::parse(location)?.into_backend(config.backend_options());
        Self::open_backend(backend, mode, schema, config)
    }

    /// Opens a store on an already instantiated backend.
    pub fn open_backend(
        mut backend: Box<dyn Backend>,
        mode: OpenMode,
        schema: impl Into<Arc<Schema>>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let schema = schema.into();
        config.validate()?;
        schema.validate()?;

        let location = backend.location();
        let scope = ObservationScope::with_fields(
            "STORE_OPEN",
            &[("location", &location), ("mode", mode.as_str())],
        );

        let metrics = StoreMetrics::new();
        let mut versions = SchemaVersionManager::new(schema.version());
        let prepared = prepare(backend.as_mut(), mode, &schema, &config, &mut versions, &metrics)
            .and_then(|schema_version| {
                let profiler = match &config.profiling {
                    Some(profiling) => {
                        let mut profiler =
                            StorageProfiler::new(profiling.identifier.clone(), profiling.path.clone());
                        profiler.start()?;
                        Some(Mutex::new(profiler))
                    }
                    None => None,
                };
                Ok((schema_version, profiler))
            });

        let (schema_version, profiler) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = backend.close();
                scope.fail(&e.to_string());
                return Err(e);
            }
        };

        let version = schema_version.to_string();
        scope.complete_with_fields(&[("schema_version", &version)]);
        log_event(
            Event::StoreOpened,
            &[
                ("location", &location),
                ("mode", mode.as_str()),
                ("schema_version", &version),
            ],
        );

        Ok(Self {
            backend,
            schema,
            config,
            mode,
            location,
            schema_version,
            versions,
            metrics,
            profiler,
            closed: false,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Schema version of the stored data.
    ///
    /// After a read-write open this is the schema's version. A read-only
    /// open of an older store reports the older version.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn version_state(&self) -> VersionState {
        self.versions.state()
    }

    /// Version states passed through while opening
    pub fn version_history(&self) -> &[VersionState] {
        self.versions.history()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Writes pending since the last commit
    pub fn pending_count(&self) -> usize {
        self.backend.pending_count()
    }

    /// Writes a container and returns its identifier.
    ///
    /// A container without an identifier receives the next sequence number
    /// of its type; the identifier is set on the container once the write
    /// is accepted. The write is durable after `commit` or `close`.
    pub fn write(&mut self, container: &mut AttributeContainer) -> StoreResult<ContainerIdentifier> {
        if !self.mode.is_writable() {
            return Err(StoreError::read_only("write"));
        }
        let type_name = container.type_name().to_string();
        match self.schema.container_type(&type_name) {
            Some(registered) if **registered == *container.container_type() => {}
            _ => return Err(StoreError::invalid_type(&type_name)),
        }

        let identifier = match container.identifier() {
            Some(identifier) => {
                if self.backend.contains(identifier) {
                    return Err(StoreError::duplicate_identifier(identifier));
                }
                identifier.clone()
            }
            None => {
                let next = self
                    .backend
                    .last_sequence_number(&type_name)
                    .checked_add(1)
                    .ok_or_else(|| StoreError::identifiers_exhausted(&type_name))?;
                ContainerIdentifier::new(type_name.clone(), next)
            }
        };

        let mut record = container.clone();
        record.set_identifier(identifier.clone())?;

        let mut profiler = self.profiler.as_ref().map(|p| p.lock());
        if let Some(profiler) = profiler.as_mut() {
            profiler.start_timing(WRITE_PROFILE);
        }
        let bytes = codec::encode(&record, self.schema_version)?;
        if let Some(profiler) = profiler.as_mut() {
            profiler.stop_timing(WRITE_PROFILE);
            let size = bytes.len() as u64;
            if let Err(e) = profiler.sample(WRITE_PROFILE, "write", &type_name, size, size) {
                self.note_profiler_failure("write", &e);
            }
        }
        drop(profiler);

        let size = bytes.len() as u64;
        self.backend
            .append(SerializedRecord::new(identifier.clone(), bytes))?;
        self.metrics.record_write(size);

        container.set_identifier(identifier.clone())?;
        Ok(identifier)
    }

    /// Reads a committed container.
    pub fn read(&self, type_name: &str, identifier: &ContainerIdentifier) -> StoreResult<AttributeContainer> {
        if !self.schema.has_type(type_name) {
            return Err(StoreError::invalid_type(type_name));
        }
        if identifier.type_name() != type_name {
            return Err(StoreError::not_found(format!(
                "container {} is not of type {}",
                identifier, type_name
            )));
        }
        let bytes = self.backend.read(identifier).map_err(|e| self.note_corrupt(e))?;
        self.decode_record(&bytes)
    }

    /// Lazily reads the committed containers of a type in write order.
    ///
    /// Containers committed after the scan started are not returned.
    pub fn scan(&self, type_name: &str) -> StoreResult<ContainerScan<'_>> {
        self.scan_with(type_name, None)
    }

    /// Like `scan`, returning only containers matching `expression`.
    pub fn scan_filtered(&self, type_name: &str, expression: &str) -> StoreResult<ContainerScan<'_>> {
        let filter = FilterExpression::parse(expression)?;
        self.scan_with(type_name, Some(filter))
    }

    fn scan_with(&self, type_name: &str, filter: Option<FilterExpression>) -> StoreResult<ContainerScan<'_>> {
        if !self.schema.has_type(type_name) {
            return Err(StoreError::invalid_type(type_name));
        }
        Ok(ContainerScan {
            store: self,
            records: self.backend.scan(type_name)?,
            filter,
        })
    }

    /// Number of committed containers of a type
    pub fn count(&self, type_name: &str) -> StoreResult<usize> {
        if !self.schema.has_type(type_name) {
            return Err(StoreError::invalid_type(type_name));
        }
        Ok(self.backend.count_committed(type_name))
    }

    /// Makes pending writes durable and visible.
    pub fn commit(&mut self) -> StoreResult<()> {
        let pending = self.backend.pending_count();
        if pending == 0 {
            return Ok(());
        }
        let pending = pending.to_string();
        let scope = ObservationScope::with_fields(
            "COMMIT",
            &[("location", &self.location), ("records", &pending)],
        );
        match self.backend.commit() {
            Ok(()) => {
                self.metrics.increment_commits();
                scope.complete();
                Ok(())
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Commits pending writes and releases the store.
    ///
    /// The lock is released even if the final commit fails; the commit
    /// error is returned and the store should be reopened to check its
    /// state.
    pub fn close(mut self) -> StoreResult<()> {
        let scope = ObservationScope::with_fields("STORE_CLOSE", &[("location", &self.location)]);
        let committed = self.commit();
        let profiled = match self.profiler.take() {
            Some(profiler) => profiler.into_inner().stop(),
            None => Ok(()),
        };
        let released = self.backend.close();
        self.closed = true;

        let result = committed.and(profiled).and(released);
        match &result {
            Ok(()) => {
                scope.complete();
                log_event(Event::StoreClosed, &[("location", &self.location)]);
            }
            Err(e) => scope.fail(&e.to_string()),
        }
        result
    }

    /// Upgrades a record to the schema's version if needed and decodes it.
    fn decode_record(&self, bytes: &[u8]) -> StoreResult<AttributeContainer> {
        let mut profiler = self.profiler.as_ref().map(|p| p.lock());
        if let Some(profiler) = profiler.as_mut() {
            profiler.start_timing(READ_PROFILE);
        }

        let decoded = record_schema_version(bytes).and_then(|version| {
            let supported = self.schema.version();
            if version == supported {
                codec::decode(bytes, &self.schema)
            } else {
                let upgraded = self.schema.migrations().migrate(bytes, supported)?;
                codec::decode(&upgraded, &self.schema)
            }
        });
        let container = match decoded {
            Ok((container, _)) => container,
            Err(e) => return Err(self.note_corrupt(e)),
        };

        if let Some(profiler) = profiler.as_mut() {
            profiler.stop_timing(READ_PROFILE);
            let size = bytes.len() as u64;
            if let Err(e) = profiler.sample(READ_PROFILE, "read", container.type_name(), size, size) {
                self.note_profiler_failure("read", &e);
            }
        }
        self.metrics.increment_reads();
        Ok(container)
    }

    /// Counts a failed profiler sample; only the first one is logged.
    fn note_profiler_failure(&self, operation: &str, error: &StoreError) {
        if self.metrics.increment_profiler_failures() == 0 {
            log_event(
                Event::ProfilerSampleFailed,
                &[
                    ("location", &self.location),
                    ("operation", operation),
                    ("error", &error.to_string()),
                ],
            );
        }
    }

    fn note_corrupt(&self, error: StoreError) -> StoreError {
        if error.is_integrity() {
            self.metrics.increment_corrupt_records();
            log_event(
                Event::CorruptRecordDetected,
                &[("location", &self.location), ("error", &error.to_string())],
            );
        }
        error
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let pending = self.backend.pending_count();
        if pending > 0 {
            log_event(
                Event::UncommittedWritesDropped,
                &[("location", &self.location), ("records", &pending.to_string())],
            );
        }
        let _ = self.backend.close();
    }
}

/// Runs the open sequence up to a ready version state.
///
/// Returns the schema version the store is served at.
fn prepare(
    backend: &mut dyn Backend,
    mode: OpenMode,
    schema: &Schema,
    config: &StoreConfig,
    versions: &mut SchemaVersionManager,
    metrics: &StoreMetrics,
) -> StoreResult<u32> {
    let header = match mode {
        OpenMode::Create => {
            backend.acquire_exclusive_lock(&config.lock_policy())?;
            if backend.exists()? {
                return Err(StoreError::already_exists(backend.location()));
            }
            let header = backend.create(schema.version())?;
            log_event(
                Event::StoreCreated,
                &[
                    ("location", &backend.location()),
                    ("schema_version", &header.schema_version.to_string()),
                ],
            );
            header
        }
        OpenMode::ReadWrite | OpenMode::ReadOnly => {
            if !backend.exists()? {
                return Err(StoreError::not_found(format!("no store at {}", backend.location())));
            }
            if mode.is_writable() {
                backend.acquire_exclusive_lock(&config.lock_policy())?;
            }
            backend.open(mode)?
        }
    };

    match versions.validate(header.schema_version, schema.migrations())? {
        VersionState::Current { version } => {
            versions.mark_ready(version)?;
            Ok(version)
        }
        VersionState::NeedsMigration { from, to } if mode.is_writable() => {
            migrate(backend, schema, versions, metrics, from, to)?;
            Ok(to)
        }
        VersionState::NeedsMigration { from, .. } => {
            versions.mark_ready(from)?;
            Ok(from)
        }
        other => Err(StoreError::forbidden_transition(other.state_name(), "Ready")),
    }
}

/// Rewrites every record through the migration chain.
///
/// Each upgraded record must decode against the schema before it is
/// re-encoded; the first failure abandons the whole migration.
fn migrate(
    backend: &mut dyn Backend,
    schema: &Schema,
    versions: &mut SchemaVersionManager,
    metrics: &StoreMetrics,
    from: u32,
    to: u32,
) -> StoreResult<()> {
    let (from_version, to_version) = (from.to_string(), to.to_string());
    let scope = ObservationScope::with_fields(
        "MIGRATION",
        &[("from", &from_version), ("to", &to_version)],
    );

    let mut migrated = 0u64;
    let result = backend.rewrite(to, &mut |bytes: &[u8]| -> StoreResult<Vec<u8>> {
        let upgraded = schema.migrations().migrate(bytes, to)?;
        let (container, _) = codec::decode(&upgraded, schema)?;
        migrated += 1;
        codec::encode(&container, to)
    });

    match result {
        Ok(_) => {
            versions.mark_ready(to)?;
            metrics.add_records_migrated(migrated);
            scope.complete_with_fields(&[("records", &migrated.to_string())]);
            Ok(())
        }
        Err(e) => {
            let _ = versions.reject();
            scope.fail(&e.to_string());
            Err(e)
        }
    }
}

/// Lazy scan over the committed containers of one type.
pub struct ContainerScan<'a> {
    store: &'a Store,
    records: RecordScan<'a>,
    filter: Option<FilterExpression>,
}

impl Iterator for ContainerScan<'_> {
    type Item = StoreResult<AttributeContainer>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let bytes = match self.records.next()? {
                Ok(bytes) => bytes,
                Err(e) => return Some(Err(self.store.note_corrupt(e))),
            };
            let container = match self.store.decode_record(&bytes) {
                Ok(container) => container,
                Err(e) => return Some(Err(e)),
            };
            match &self.filter {
                Some(filter) if !filter.matches(&container) => continue,
                _ => return Some(Ok(container)),
            }
        }
    }
}
