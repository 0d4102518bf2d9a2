//! Child process management for crash tests
//!
//! A scenario consists of a parent test and a child test. The child test is
//! a no-op in a normal run; when the parent re-executes the binary with the
//! child's exact name, a crash point and a data directory, the child runs
//! its operation against that directory and aborts.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use acstore::crash_point::CRASH_POINT_ENV;

/// Environment variable carrying the data directory to a child run
pub const CRASH_DATA_DIR_ENV: &str = "ACSTORE_CRASH_DATA_DIR";

/// Result of a child execution
#[derive(Debug)]
pub struct CrashTestResult {
    /// Whether the child exited abnormally
    pub crashed: bool,
    pub exit_status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl CrashTestResult {
    /// True if the child announced the crash point before aborting
    pub fn reached(&self, crash_point: &str) -> bool {
        self.stderr
            .contains(&format!("Triggering crash at point: {}", crash_point))
    }
}

/// Data directory of a child run, `None` in a normal test run.
pub fn child_data_dir() -> Option<PathBuf> {
    std::env::var_os(CRASH_DATA_DIR_ENV).map(PathBuf::from)
}

/// Runs the child test `test_name` with `crash_point` enabled.
pub fn run_child(test_name: &str, crash_point: &str, data_dir: &Path) -> CrashTestResult {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            return CrashTestResult {
                crashed: false,
                exit_status: None,
                stdout: String::new(),
                stderr: format!("Failed to locate test binary: {}", e),
            }
        }
    };

    let output = Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CRASH_POINT_ENV, crash_point)
        .env(CRASH_DATA_DIR_ENV, data_dir)
        .output();

    match output {
        Ok(output) => CrashTestResult {
            crashed: !output.status.success(),
            exit_status: Some(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => CrashTestResult {
            crashed: false,
            exit_status: None,
            stdout: String::new(),
            stderr: format!("Failed to execute: {}", e),
        },
    }
}

/// Fails the test unless the child aborted at `crash_point`.
pub fn assert_crashed_at(result: &CrashTestResult, crash_point: &str) {
    if !(result.crashed && result.reached(crash_point)) {
        report_failure(crash_point, result);
        panic!("child did not crash at {}", crash_point);
    }
}

fn report_failure(crash_point: &str, result: &CrashTestResult) {
    eprintln!("=== CRASH TEST FAILURE ===");
    eprintln!("Crash point: {}", crash_point);
    eprintln!("Exit status: {:?}", result.exit_status);
    eprintln!("Child stdout:\n{}", result.stdout);
    eprintln!("Child stderr:\n{}", result.stderr);
    eprintln!("==========================");
}
