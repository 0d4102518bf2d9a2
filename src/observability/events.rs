//! Observable store events

use std::fmt;

/// Events emitted over the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    StoreCreated,
    StoreOpened,
    StoreClosed,

    // Recovery
    /// Bytes past the committed log end were found on open
    DanglingTailDiscarded,
    /// Staged migration files were completed on open
    MigrationRolledForward,
    /// Staged migration files were removed on open
    MigrationDiscarded,
    /// A lock left by a dead holder was taken over
    StaleLockReclaimed,

    // Writes
    /// Store dropped without close while writes were pending
    UncommittedWritesDropped,

    // Integrity
    CorruptRecordDetected,

    // Profiling
    /// A profiler sample could not be written
    ProfilerSampleFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreCreated => "STORE_CREATED",
            Event::StoreOpened => "STORE_OPENED",
            Event::StoreClosed => "STORE_CLOSED",
            Event::DanglingTailDiscarded => "DANGLING_TAIL_DISCARDED",
            Event::MigrationRolledForward => "MIGRATION_ROLLED_FORWARD",
            Event::MigrationDiscarded => "MIGRATION_DISCARDED",
            Event::StaleLockReclaimed => "STALE_LOCK_RECLAIMED",
            Event::UncommittedWritesDropped => "UNCOMMITTED_WRITES_DROPPED",
            Event::CorruptRecordDetected => "CORRUPT_RECORD_DETECTED",
            Event::ProfilerSampleFailed => "PROFILER_SAMPLE_FAILED",
        }
    }

    /// Events that point at an abnormal termination or damaged data
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::DanglingTailDiscarded
                | Event::MigrationRolledForward
                | Event::MigrationDiscarded
                | Event::StaleLockReclaimed
                | Event::UncommittedWritesDropped
                | Event::CorruptRecordDetected
                | Event::ProfilerSampleFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
