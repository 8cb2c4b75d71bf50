//! Cross-process advisory locks on lock files.
//!
//! Other processes driving the same boards take the same `flock(2)` lock, so
//! a bus transaction from this process never interleaves with theirs.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{HatError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Held advisory lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take an exclusive lock on `path`, polling until `timeout` elapses.
    ///
    /// The file is created if needed and left in place afterwards.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                HatError::unavailable(format!("cannot open lock file {}: {e}", path.display()))
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_lock(&file)? {
                trace!(path = %path.display(), "lock acquired");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(HatError::LockTimeout {
                    path: path.display().to_string(),
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[allow(unsafe_code)]
fn try_lock(file: &File) -> Result<bool> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EWOULDBLOCK) | Some(libc::EINTR) => Ok(false),
        _ => Err(err.into()),
    }
}

impl Drop for FileLock {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        trace!(path = %self.path.display(), "lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");
        {
            let lock = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
            assert_eq!(lock.path(), path.as_path());
        }
        // Released on drop, so a second acquire succeeds immediately.
        assert!(FileLock::acquire(&path, Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");
        let _held = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();

        // flock locks belong to the open file description, so a second open
        // in the same process contends like another process would.
        let start = Instant::now();
        let err = FileLock::acquire(&path, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, HatError::LockTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let err = FileLock::acquire(
            Path::new("/nonexistent-dir-for-daqhats/bus.lock"),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(err.is_unavailable());
    }
}
