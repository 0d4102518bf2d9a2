//! Observability subsystem
//!
//! - Structured JSON logging of store lifecycle events
//! - Per-store counters
//! - Optional storage profiling of record sizes and processing time
//!
//! Observability is read-only: a failure to log never fails a store
//! operation.
//!
//! ```ignore
//! use acstore::observability::{Logger, ObservationScope};
//!
//! Logger::warn("STALE_LOCK_RECLAIMED", &[("location", "/cases/1.acs")]);
//!
//! let scope = ObservationScope::new("COMMIT");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod profiler;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity, LOG_LEVEL_ENV};
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use profiler::{CpuTimeMeasurement, StorageProfiler};
pub use scope::ObservationScope;

/// Log a lifecycle event
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
