//! Exclusive writer lock for file stores
//!
//! The lock is an advisory exclusive lock on `<store>.lock`. While held,
//! the file contains the holder's liveness token. Release truncates the
//! token before unlocking, so a token found by a new holder means the
//! previous holder terminated without releasing: the lock is stale and is
//! taken over.
//!
//! The lock file is never deleted; removing it would let a waiter that
//! already opened it lock an orphaned inode.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LockPolicy;
use crate::errors::{StoreError, StoreResult};
use crate::observability::{log_event, Event};

/// Identity of a lock holder, written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessToken {
    pub pid: u32,
    pub token: Uuid,
    /// Microseconds since the Unix epoch
    pub acquired_at: i64,
}

impl LivenessToken {
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
            token: Uuid::new_v4(),
            acquired_at: Utc::now().timestamp_micros(),
        }
    }
}

impl Default for LivenessToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A held exclusive lock. Released on `release` or drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    token: LivenessToken,
}

impl FileLock {
    /// Lock file path of the store at `store_path`
    pub fn lock_path(store_path: &Path) -> PathBuf {
        let mut name = store_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquires the lock, retrying until `policy.timeout` has elapsed.
    pub fn acquire(path: &Path, policy: &LockPolicy) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                StoreError::io(format!("failed to open lock file {}", path.display()), e)
            })?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= policy.timeout {
                        return Err(StoreError::lock_timeout(
                            path.display(),
                            waited.as_millis() as u64,
                        ));
                    }
                    thread::sleep(policy.retry_interval.min(policy.timeout - waited));
                }
                Err(e) => {
                    return Err(StoreError::io(
                        format!("failed to lock {}", path.display()),
                        e,
                    ))
                }
            }
        }

        let mut lock = Self {
            path: path.to_path_buf(),
            file: Some(file),
            token: LivenessToken::new(),
        };
        lock.take_over()?;
        Ok(lock)
    }

    /// Reads any token left behind, then writes ours.
    fn take_over(&mut self) -> StoreResult<()> {
        let path = self.path.clone();
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return Ok(()),
        };

        let mut previous = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut previous))
            .map_err(|e| StoreError::io(format!("failed to read lock file {}", path.display()), e))?;

        if !previous.trim().is_empty() {
            let holder = serde_json::from_str::<LivenessToken>(&previous)
                .map(|t| format!("pid {} token {}", t.pid, t.token))
                .unwrap_or_else(|_| "unreadable token".to_string());
            log_event(
                Event::StaleLockReclaimed,
                &[("lock", &path.display().to_string()), ("previous_holder", &holder)],
            );
        }

        let content = serde_json::to_vec(&self.token)
            .map_err(|e| StoreError::encoding(format!("failed to serialize lock token: {}", e)))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&content))
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(format!("failed to write lock file {}", path.display()), e))?;
        Ok(())
    }

    pub fn token(&self) -> &LivenessToken {
        &self.token
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clears the token and unlocks. Idempotent.
    pub fn release(&mut self) -> StoreResult<()> {
        if let Some(file) = self.file.take() {
            let cleared = file.set_len(0).and_then(|_| file.sync_data());
            let unlocked = FileExt::unlock(&file);
            cleared.map_err(|e| {
                StoreError::io(format!("failed to clear lock file {}", self.path.display()), e)
            })?;
            unlocked.map_err(|e| {
                StoreError::io(format!("failed to unlock {}", self.path.display()), e)
            })?;
        }
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreErrorCode;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quick() -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            FileLock::lock_path(Path::new("/cases/a.acs")),
            PathBuf::from("/cases/a.acs.lock")
        );
    }

    #[test]
    fn test_acquire_writes_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let lock = FileLock::acquire(&path, &quick()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let token: LivenessToken = serde_json::from_str(&content).unwrap();
        assert_eq!(&token, lock.token());
        assert_eq!(token.pid, std::process::id());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let _held = FileLock::acquire(&path, &quick()).unwrap();

        let started = Instant::now();
        let err = FileLock::acquire(&path, &quick()).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::LockTimeout);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_release_clears_token_and_unlocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let mut lock = FileLock::acquire(&path, &quick()).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);

        FileLock::acquire(&path, &quick()).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        drop(FileLock::acquire(&path, &quick()).unwrap());
        FileLock::acquire(&path, &quick()).unwrap();
    }

    #[test]
    fn test_stale_token_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let dead = LivenessToken {
            pid: u32::MAX,
            token: Uuid::new_v4(),
            acquired_at: 0,
        };
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let lock = FileLock::acquire(&path, &quick()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let token: LivenessToken = serde_json::from_str(&content).unwrap();
        assert_eq!(&token, lock.token());
        assert_ne!(token.token, dead.token);
    }
}
