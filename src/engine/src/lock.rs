//! Advisory file locking.
//!
//! Every store directory and every bundle carries a lockfile. Cross
//! process, exclusion uses POSIX fcntl record locks, which the kernel
//! releases when the holder dies. In process, a per-path wait registry
//! serialises threads before they reach the kernel lock, since fcntl
//! locks are per-process and would otherwise silently succeed for a
//! second thread.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use rustix::fs::{fcntl_lock, FlockOperation};
use skiff_core::error::{Result, SkiffError};

/// In-process gate for one lockfile path.
#[derive(Debug, Default)]
struct PathGate {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl PathGate {
    fn acquire(&self) {
        let mut locked = self.locked.lock().expect("lock registry poisoned");
        while *locked {
            locked = self.cond.wait(locked).expect("lock registry poisoned");
        }
        *locked = true;
    }

    fn try_acquire(&self) -> bool {
        let mut locked = self.locked.lock().expect("lock registry poisoned");
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn release(&self) {
        let mut locked = self.locked.lock().expect("lock registry poisoned");
        *locked = false;
        self.cond.notify_one();
    }
}

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<PathGate>>>> = OnceLock::new();

fn gate_for(path: &Path) -> Arc<PathGate> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut registry = REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .expect("lock registry poisoned");
    registry.entry(key).or_default().clone()
}

/// A lockfile guarding a store directory or bundle.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, blocking until it is free.
    pub fn lock(&self) -> Result<LockGuard> {
        let gate = gate_for(&self.path);
        gate.acquire();
        match self.flock(FlockOperation::LockExclusive) {
            Ok(file) => Ok(LockGuard {
                file,
                gate,
                path: self.path.clone(),
            }),
            Err(e) => {
                gate.release();
                Err(e)
            }
        }
    }

    /// Acquire the lock or fail immediately with `Locked`.
    pub fn try_lock(&self) -> Result<LockGuard> {
        let gate = gate_for(&self.path);
        if !gate.try_acquire() {
            return Err(SkiffError::Locked(format!(
                "{} is held by this process",
                self.path.display()
            )));
        }
        match self.flock(FlockOperation::NonBlockingLockExclusive) {
            Ok(file) => Ok(LockGuard {
                file,
                gate,
                path: self.path.clone(),
            }),
            Err(e) => {
                gate.release();
                Err(e)
            }
        }
    }

    fn flock(&self, op: FlockOperation) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SkiffError::Other(format!("create lock parent {}: {e}", parent.display()))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                SkiffError::Other(format!("open lockfile {}: {e}", self.path.display()))
            })?;
        match fcntl_lock(file.as_fd(), op) {
            Ok(()) => Ok(file),
            Err(rustix::io::Errno::AGAIN) | Err(rustix::io::Errno::ACCESS) => {
                Err(SkiffError::Locked(format!(
                    "{} is held by another process",
                    self.path.display()
                )))
            }
            Err(e) => Err(SkiffError::Other(format!(
                "lock {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Holds an exclusive lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    gate: Arc<PathGate>,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fcntl_lock(self.file.as_fd(), FlockOperation::Unlock);
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_and_release() {
        let tmp = TempDir::new().unwrap();
        let lock = LockFile::new(tmp.path().join("lock"));
        let guard = lock.lock().unwrap();
        drop(guard);
        // Reacquire after release.
        let _guard = lock.lock().unwrap();
    }

    #[test]
    fn test_try_lock_conflict_in_process() {
        let tmp = TempDir::new().unwrap();
        let lock = LockFile::new(tmp.path().join("lock"));
        let _held = lock.try_lock().unwrap();

        let second = LockFile::new(tmp.path().join("lock"));
        let err = second.try_lock().unwrap_err();
        assert!(matches!(err, SkiffError::Locked(_)));
    }

    #[test]
    fn test_lock_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let lock = LockFile::new(tmp.path().join("a/b/lock"));
        let _guard = lock.lock().unwrap();
        assert!(tmp.path().join("a/b/lock").is_file());
    }

    #[test]
    fn test_blocking_lock_waits_for_thread() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lock");
        let lock = LockFile::new(&path);
        let guard = lock.lock().unwrap();

        let path2 = path.clone();
        let handle = std::thread::spawn(move || {
            let lock = LockFile::new(path2);
            let _guard = lock.lock().unwrap();
        });

        // Give the thread a moment to reach the wait, then release.
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_distinct_paths_do_not_conflict() {
        let tmp = TempDir::new().unwrap();
        let a = LockFile::new(tmp.path().join("a.lock"));
        let b = LockFile::new(tmp.path().join("b.lock"));
        let _ga = a.try_lock().unwrap();
        let _gb = b.try_lock().unwrap();
    }
}
