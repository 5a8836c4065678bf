//! Advisory file locking (`FileLock`).
//!
//! Probes whether a source file is currently being written by another
//! process, without modifying it, and reserves destination paths exclusively
//! during a copy. Grounded on `original_source/common/locker/` (the
//! `ILocker::LockMode { SHARE, EXCLUSIVE }` / `LockType { READ, WRITE }` axes
//! and the `RECOVERABLE`/`UNRECOVERABLE` sentinel returned by `tryLock()`) —
//! restated here as plain enums instead of raw ints, and backed by `flock(2)`
//! on unix rather than a platform-specific lock file implementation.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Whether other accessors may hold a concurrent lock on the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Other accessors may acquire a compatible lock concurrently.
    Share,
    /// No other accessor may hold any lock on the file at the same time.
    NoShare,
}

/// Whether the lock is being acquired for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// The file must already exist.
    Read,
    /// The file is created if absent.
    Write,
}

/// An open, locked file handle. Releases the lock when dropped.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// The underlying open file descriptor, for callers (the Copier) that
    /// prefer to reuse it rather than reopen the path.
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    /// Releases the lock. Idempotent — safe to call more than once, and
    /// implied by `Drop` if never called explicitly.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            unlock_file(&file);
            drop(file);
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockResult {
    /// The lock is held; `handle` must be kept alive for as long as the lock
    /// should be held.
    Acquired(LockHandle),
    /// Transient conflict (another accessor holds an incompatible lock, or
    /// `AccessMode::Write` raced another exclusive creator). Retry later.
    Recoverable,
    /// Permission denied, missing read target, or any other unrecoverable
    /// error. Carries a human-readable message for the caller's `Error`
    /// event.
    Unrecoverable(String),
}

impl LockResult {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockResult::Acquired(_))
    }
}

/// Attempts to acquire a lock on `path` once, without blocking.
pub fn try_lock(path: &Path, share: ShareMode, access: AccessMode) -> LockResult {
    let mut options = OpenOptions::new();
    match access {
        AccessMode::Read => {
            options.read(true);
        }
        AccessMode::Write => {
            options.write(true).create(true);
        }
    }

    let file = match options.open(path) {
        Ok(file) => file,
        Err(err) => {
            return classify_open_error(path, access, err);
        }
    };

    match lock_file(&file, share) {
        Ok(true) => LockResult::Acquired(LockHandle {
            path: path.to_path_buf(),
            file: Some(file),
        }),
        Ok(false) => LockResult::Recoverable,
        Err(err) => LockResult::Unrecoverable(format!("failed to lock {}: {err}", path.display())),
    }
}

/// Loops [`try_lock`] every 100ms until `timeout` elapses. A `Recoverable`
/// result that never resolves within the deadline collapses to
/// `Unrecoverable`.
pub fn lock(path: &Path, share: ShareMode, access: AccessMode, timeout: Duration) -> LockResult {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    let deadline = Instant::now() + timeout;

    loop {
        match try_lock(path, share, access) {
            LockResult::Recoverable => {
                if Instant::now() >= deadline {
                    return LockResult::Unrecoverable(format!(
                        "timed out waiting for lock on {}",
                        path.display()
                    ));
                }
                std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
            }
            other => return other,
        }
    }
}

fn classify_open_error(path: &Path, access: AccessMode, err: io::Error) -> LockResult {
    match err.kind() {
        io::ErrorKind::NotFound if access == AccessMode::Read => {
            LockResult::Unrecoverable(format!("{} does not exist", path.display()))
        }
        io::ErrorKind::PermissionDenied => {
            LockResult::Unrecoverable(format!("permission denied opening {}", path.display()))
        }
        io::ErrorKind::AlreadyExists => LockResult::Recoverable,
        _ => LockResult::Unrecoverable(format!("failed to open {}: {err}", path.display())),
    }
}

#[cfg(unix)]
fn lock_file(file: &File, share: ShareMode) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match share {
        ShareMode::Share => libc::LOCK_SH,
        ShareMode::NoShare => libc::LOCK_EX,
    } | libc::LOCK_NB;

    // SAFETY: fd is a valid, open file descriptor owned by `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
    if rc == 0 {
        Ok(true)
    } else {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) => Ok(false),
            _ => Err(err),
        }
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is a valid, open file descriptor owned by `file`.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn lock_file(_file: &File, _share: ShareMode) -> io::Result<bool> {
    // No portable advisory-lock primitive without a platform-specific API;
    // treat a successful open as sufficient signal of availability.
    Ok(true)
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_lock_on_missing_file_is_unrecoverable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let result = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        assert!(matches!(result, LockResult::Unrecoverable(_)));
    }

    #[test]
    fn write_lock_creates_absent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.txt");
        let result = try_lock(&path, ShareMode::NoShare, AccessMode::Write);
        assert!(result.is_acquired());
        assert!(path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn exclusive_lock_blocks_a_second_exclusive_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let first = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        assert!(first.is_acquired());

        let second = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        assert!(matches!(second, LockResult::Recoverable));
    }

    #[test]
    #[cfg(unix)]
    fn unlocking_releases_the_file_for_others() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let mut first = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        if let LockResult::Acquired(handle) = &mut first {
            handle.unlock();
        } else {
            panic!("expected Acquired");
        }

        let second = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        assert!(second.is_acquired());
    }

    #[test]
    fn lock_retries_until_timeout_then_reports_unrecoverable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let _held = try_lock(&path, ShareMode::NoShare, AccessMode::Read);
        assert!(_held.is_acquired());

        let start = Instant::now();
        let result = lock(&path, ShareMode::NoShare, AccessMode::Read, Duration::from_millis(250));
        assert!(matches!(result, LockResult::Unrecoverable(_)));
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
