//! Storage profiler
//!
//! Writes one tab-separated sample per record read or written to a zstd
//! compressed UTF-8 file named `storage-<identifier>.csv.zst`:
//!
//! ```text
//! Time  Name  Operation  Description  Processing time  Data size  Compressed data size
//! ```
//!
//! `Time` is the Unix time in seconds at which the profile's last timing
//! started and `Processing time` the seconds measured between
//! `start_timing` and `stop_timing`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::errors::{StoreError, StoreResult};

const FILENAME_PREFIX: &str = "storage";

const FILE_HEADER: &str =
    "Time\tName\tOperation\tDescription\tProcessing time\tData size\tCompressed data size\n";

const COMPRESSION_LEVEL: i32 = 3;

/// Processing time measurement of one profile.
#[derive(Debug, Default)]
pub struct CpuTimeMeasurement {
    started: Option<Instant>,
    /// Unix time in seconds of the last `sample_start`
    pub start_sample_time: Option<f64>,
    /// Seconds accumulated since the last `sample_start`
    pub total_cpu_time: f64,
}

impl CpuTimeMeasurement {
    pub fn sample_start(&mut self) {
        self.started = Some(Instant::now());
        self.start_sample_time = Some(unix_time_seconds());
        self.total_cpu_time = 0.0;
    }

    pub fn sample_stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total_cpu_time += started.elapsed().as_secs_f64();
        }
    }
}

fn unix_time_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Profiler sampling the data read from and written to a store.
pub struct StorageProfiler {
    identifier: String,
    path: PathBuf,
    measurements: HashMap<String, CpuTimeMeasurement>,
    sample_file: Option<zstd::Encoder<'static, BufWriter<File>>>,
}

impl StorageProfiler {
    /// Creates a profiler writing its sample file into the directory `path`.
    pub fn new(identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
            measurements: HashMap::new(),
            sample_file: None,
        }
    }

    /// Path of the sample file
    pub fn sample_file_path(&self) -> PathBuf {
        let filename = format!("{}-{}.csv.zst", FILENAME_PREFIX, self.identifier);
        if self.path.as_os_str().is_empty() {
            PathBuf::from(filename)
        } else {
            self.path.join(filename)
        }
    }

    pub fn is_started(&self) -> bool {
        self.sample_file.is_some()
    }

    /// Creates the sample file and writes the header.
    pub fn start(&mut self) -> StoreResult<()> {
        let file_path = self.sample_file_path();
        let file = File::create(&file_path).map_err(|e| {
            StoreError::io(
                format!("failed to create profiler sample file {}", file_path.display()),
                e,
            )
        })?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)
            .map_err(|e| StoreError::io("failed to create zstd encoder", e))?;
        self.sample_file = Some(encoder);
        self.write_string(FILE_HEADER)
    }

    /// Finishes the compressed stream and closes the sample file.
    pub fn stop(&mut self) -> StoreResult<()> {
        if let Some(encoder) = self.sample_file.take() {
            let mut writer = encoder
                .finish()
                .map_err(|e| StoreError::io("failed to finish profiler sample file", e))?;
            writer
                .flush()
                .map_err(|e| StoreError::io("failed to flush profiler sample file", e))?;
        }
        Ok(())
    }

    pub fn start_timing(&mut self, profile_name: &str) {
        self.measurements
            .entry(profile_name.to_string())
            .or_default()
            .sample_start();
    }

    pub fn stop_timing(&mut self, profile_name: &str) {
        if let Some(measurement) = self.measurements.get_mut(profile_name) {
            measurement.sample_stop();
        }
    }

    /// Writes a sample of data read or written.
    ///
    /// Samples taken while the profiler is stopped are discarded.
    pub fn sample(
        &mut self,
        profile_name: &str,
        operation: &str,
        description: &str,
        data_size: u64,
        compressed_data_size: u64,
    ) -> StoreResult<()> {
        if self.sample_file.is_none() {
            return Ok(());
        }
        let (sample_time, processing_time) = match self.measurements.get(profile_name) {
            Some(m) => (
                m.start_sample_time.unwrap_or_else(unix_time_seconds),
                m.total_cpu_time,
            ),
            None => (unix_time_seconds(), 0.0),
        };
        let line = format!(
            "{:.6}\t{}\t{}\t{}\t{:.6}\t{}\t{}\n",
            sample_time,
            profile_name,
            operation,
            description,
            processing_time,
            data_size,
            compressed_data_size
        );
        self.write_string(&line)
    }

    fn write_string(&mut self, content: &str) -> StoreResult<()> {
        match self.sample_file {
            Some(ref mut encoder) => encoder
                .write_all(content.as_bytes())
                .map_err(|e| StoreError::io("failed to write profiler sample", e)),
            None => Ok(()),
        }
    }

    /// Directory the sample file is written to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageProfiler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_samples(path: &Path) -> String {
        let compressed = std::fs::read(path).unwrap();
        let mut decoder = zstd::Decoder::new(&compressed[..]).unwrap();
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_sample_file_layout() {
        let dir = TempDir::new().unwrap();
        let mut profiler = StorageProfiler::new("session1", dir.path());
        profiler.start().unwrap();

        profiler.start_timing("file_entry");
        profiler.stop_timing("file_entry");
        profiler.sample("file_entry", "write", "file_entry", 120, 80).unwrap();
        profiler.sample("event", "read", "event", 10, 10).unwrap();
        profiler.stop().unwrap();

        let path = dir.path().join("storage-session1.csv.zst");
        assert_eq!(profiler.sample_file_path(), path);

        let text = read_samples(&path);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], FILE_HEADER.trim_end());

        let columns: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(columns.len(), 7);
        assert_eq!(&columns[1..4], &["file_entry", "write", "file_entry"]);
        assert_eq!(&columns[5..], &["120", "80"]);
        assert!(columns[0].parse::<f64>().unwrap() > 0.0);

        let columns: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(columns[4], "0.000000");
    }

    #[test]
    fn test_sample_before_start_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut profiler = StorageProfiler::new("idle", dir.path());
        profiler.sample("x", "read", "x", 1, 1).unwrap();
        assert!(!profiler.sample_file_path().exists());
    }

    #[test]
    fn test_stop_timing_without_start() {
        let mut profiler = StorageProfiler::new("t", "");
        profiler.stop_timing("never");
        let mut measurement = CpuTimeMeasurement::default();
        measurement.sample_stop();
        assert_eq!(measurement.total_cpu_time, 0.0);
    }
}
