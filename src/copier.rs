//! Single-file interruptible copy with progress, cancellation and exclusive
//! destination reservation (`Copier`).
//!
//! The chunked read/write loop with a cancellation check before every read
//! is grounded on the teacher's `chunked_copy.rs::copy_data_chunked`
//! (1 MiB chunks, partial destination removed on cancellation). The
//! `Continue / Cancel / Stop` progress-callback contract generalizes the
//! `PROGRESS_CANCEL`/`PROGRESS_CONTINUE` callback in
//! `original_source/common/copier/windows/copier.cpp`, adding `Stop` for an
//! I/O fault distinct from user cancellation.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::transfer::Transfer;

const CHUNK_SIZE: usize = 1024 * 1024;
const PARTIAL_CHECK_WINDOW: u64 = 1024;
const PARTIAL_CHECK_SAMPLES: u32 = 50;

/// Instruction returned by a progress callback, checked between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    Continue,
    Cancel,
    Stop,
}

/// Lifecycle events emitted by one [`Copier::start`] run.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyEvent {
    CopyStart(Transfer),
    Copy(Transfer, f64),
    CopyEnd(Transfer),
    CopyFailed(Transfer, CopyError),
    CopyCanceled(Transfer),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CopyError {
    FileExists,
    IoError { message: String },
}

impl std::fmt::Display for CopyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyError::FileExists => write!(f, "destination already exists with different content"),
            CopyError::IoError { message } => write!(f, "I/O error during copy: {message}"),
        }
    }
}

impl std::error::Error for CopyError {}

impl From<std::io::Error> for CopyError {
    fn from(err: std::io::Error) -> Self {
        CopyError::IoError {
            message: err.to_string(),
        }
    }
}

/// Shared cancellation/completion flags for one in-flight copy, observable
/// from outside the copier thread. Mirrors spec.md's `InFlightCopier`
/// fields; kept separate from `Copier` itself so a caller (the Worker) can
/// hold this handle while the copier runs on a pool thread.
#[derive(Debug, Default)]
pub struct CopyHandle {
    cancel_flag: AtomicBool,
    done_flag: AtomicBool,
}

impl CopyHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        if !self.done_flag.load(Ordering::SeqCst) {
            self.cancel_flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done_flag.load(Ordering::SeqCst)
    }

    fn mark_done(&self) {
        self.done_flag.store(true, Ordering::SeqCst);
    }
}

/// Performs one copy of `transfer.from` to `transfer.to`, emitting each
/// event to `on_event` as it occurs. Runs to completion on the calling
/// thread — callers dispatch this onto a worker pool.
pub fn start(transfer: Transfer, handle: &Arc<CopyHandle>, mut on_event: impl FnMut(CopyEvent)) {
    let result = run(&transfer, handle, &mut on_event);
    handle.mark_done();

    match result {
        Ok(()) => on_event(CopyEvent::CopyEnd(transfer)),
        Err(RunOutcome::Canceled) => on_event(CopyEvent::CopyCanceled(transfer)),
        Err(RunOutcome::Failed(err)) => on_event(CopyEvent::CopyFailed(transfer, err)),
    }
}

enum RunOutcome {
    Canceled,
    Failed(CopyError),
}

fn run(
    transfer: &Transfer,
    handle: &Arc<CopyHandle>,
    on_event: &mut impl FnMut(CopyEvent),
) -> Result<(), RunOutcome> {
    let Transfer { from, to } = transfer;

    if let Some(parent) = to.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return Err(RunOutcome::Failed(err.into()));
        }
    }

    on_event(CopyEvent::CopyStart(transfer.clone()));

    let mut src = File::open(from).map_err(|e| RunOutcome::Failed(e.into()))?;
    let source_size = src.metadata().map(|m| m.len()).unwrap_or(0);

    let dst = match File::options().write(true).create_new(true).open(to) {
        Ok(dst) => dst,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            return if is_up_to_date(from, to) {
                Ok(())
            } else {
                Err(RunOutcome::Failed(CopyError::FileExists))
            };
        }
        Err(err) => return Err(RunOutcome::Failed(err.into())),
    };

    match copy_chunked(&mut src, dst, source_size, handle, on_event, transfer) {
        Ok(()) => {
            if let Err(err) = copy_metadata(from, to) {
                log::warn!(target: "pulldog::copier", "failed to copy metadata {} -> {}: {err}", from.display(), to.display());
            }
            Ok(())
        }
        Err(outcome) => {
            let _ = fs::remove_file(to);
            Err(outcome)
        }
    }
}

fn copy_chunked(
    src: &mut File,
    mut dst: File,
    source_size: u64,
    handle: &Arc<CopyHandle>,
    on_event: &mut impl FnMut(CopyEvent),
    transfer: &Transfer,
) -> Result<(), RunOutcome> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total_bytes = 0u64;

    loop {
        if handle.is_canceled() {
            return Err(RunOutcome::Canceled);
        }

        let bytes_read = match src.read(&mut buffer) {
            Ok(n) => n,
            Err(err) => return Err(RunOutcome::Failed(err.into())),
        };

        if bytes_read == 0 {
            break;
        }

        if let Err(err) = dst.write_all(&buffer[..bytes_read]) {
            return Err(RunOutcome::Failed(err.into()));
        }

        total_bytes += bytes_read as u64;

        let fraction = if source_size == 0 {
            1.0
        } else {
            (total_bytes as f64 / source_size as f64).min(1.0)
        };

        match dispatch_progress(transfer, fraction, handle, on_event) {
            ProgressSignal::Continue => {}
            ProgressSignal::Cancel => return Err(RunOutcome::Canceled),
            ProgressSignal::Stop => {
                return Err(RunOutcome::Failed(CopyError::IoError {
                    message: "destination handle became invalid".to_string(),
                }))
            }
        }
    }

    Ok(())
}

fn dispatch_progress(
    transfer: &Transfer,
    fraction: f64,
    handle: &Arc<CopyHandle>,
    on_event: &mut impl FnMut(CopyEvent),
) -> ProgressSignal {
    on_event(CopyEvent::Copy(transfer.clone(), fraction));
    if handle.is_canceled() {
        ProgressSignal::Cancel
    } else {
        ProgressSignal::Continue
    }
}

fn copy_metadata(source: &Path, dest: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(source)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    let atime = filetime::FileTime::from_last_access_time(&meta);
    filetime::set_file_times(dest, atime, mtime)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(meta.permissions().mode()))?;
    }

    Ok(())
}

/// Probabilistic idempotent-copy check consulted only after the platform
/// layer has reported "destination already exists". Design values
/// `H = 1024`, `N = 50` per spec.md §4.5.1.
pub fn is_up_to_date(src: &Path, dst: &Path) -> bool {
    let (src_meta, dst_meta) = match (fs::metadata(src), fs::metadata(dst)) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return false,
    };

    if src_meta.len() != dst_meta.len() {
        return false;
    }

    let src_mtime = match src_meta.modified() {
        Ok(t) => t,
        Err(_) => return false,
    };
    let dst_created = dst_meta.created().or_else(|_| dst_meta.modified()).ok();
    match dst_created {
        Some(dst_created) if dst_created >= src_mtime => {}
        _ => return false,
    }

    partial_content_matches(src, dst, src_meta.len())
}

fn partial_content_matches(src: &Path, dst: &Path, size: u64) -> bool {
    let mut src_file = match File::open(src) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut dst_file = match File::open(dst) {
        Ok(f) => f,
        Err(_) => return false,
    };

    if size < PARTIAL_CHECK_WINDOW {
        return files_fully_equal(&mut src_file, &mut dst_file);
    }

    if !chunks_equal(&mut src_file, &mut dst_file, 0, PARTIAL_CHECK_WINDOW) {
        return false;
    }
    if !chunks_equal(&mut src_file, &mut dst_file, size - PARTIAL_CHECK_WINDOW, PARTIAL_CHECK_WINDOW) {
        return false;
    }

    let mut rng = rand::rng();
    let max_offset = size - PARTIAL_CHECK_WINDOW;
    for _ in 0..PARTIAL_CHECK_SAMPLES {
        let offset = rng.random_range(0..=max_offset);
        if !chunks_equal(&mut src_file, &mut dst_file, offset, PARTIAL_CHECK_WINDOW) {
            return false;
        }
    }

    true
}

fn chunks_equal(src: &mut File, dst: &mut File, offset: u64, len: u64) -> bool {
    use std::io::{Seek, SeekFrom};

    let mut src_buf = vec![0u8; len as usize];
    let mut dst_buf = vec![0u8; len as usize];

    if src.seek(SeekFrom::Start(offset)).is_err() || dst.seek(SeekFrom::Start(offset)).is_err() {
        return false;
    }
    if src.read_exact(&mut src_buf).is_err() || dst.read_exact(&mut dst_buf).is_err() {
        return false;
    }

    src_buf == dst_buf
}

fn files_fully_equal(src: &mut File, dst: &mut File) -> bool {
    let mut src_buf = Vec::new();
    let mut dst_buf = Vec::new();
    if src.read_to_end(&mut src_buf).is_err() || dst.read_to_end(&mut dst_buf).is_err() {
        return false;
    }
    src_buf == dst_buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn transfer(dir: &Path, name: &str) -> Transfer {
        Transfer::new(dir.join("src").join(name), dir.join("dst").join(name))
    }

    #[test]
    fn successful_copy_emits_start_progress_end_in_order() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let t = transfer(dir.path(), "a.txt");
        fs::write(&t.from, vec![1u8; 4096]).unwrap();

        let handle = CopyHandle::new();
        let mut events = Vec::new();
        start(t.clone(), &handle, |e| events.push(e));

        assert_eq!(events.first(), Some(&CopyEvent::CopyStart(t.clone())));
        assert_eq!(events.last(), Some(&CopyEvent::CopyEnd(t.clone())));
        assert_eq!(fs::read(&t.to).unwrap(), vec![1u8; 4096]);
    }

    #[test]
    fn existing_identical_destination_is_idempotent_skip() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("dst")).unwrap();
        let t = transfer(dir.path(), "a.txt");
        fs::write(&t.from, vec![7u8; 4096]).unwrap();
        fs::write(&t.to, vec![7u8; 4096]).unwrap();

        let dst_meta = fs::metadata(&t.to).unwrap();
        let future = filetime::FileTime::from_unix_time(
            filetime::FileTime::from_last_modification_time(&dst_meta).seconds() + 3600,
            0,
        );
        filetime::set_file_times(&t.to, future, future).unwrap();

        let handle = CopyHandle::new();
        let mut events = Vec::new();
        start(t.clone(), &handle, |e| events.push(e));

        assert_eq!(events, vec![CopyEvent::CopyStart(t.clone()), CopyEvent::CopyEnd(t)]);
    }

    #[test]
    fn existing_different_destination_fails_with_file_exists() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("dst")).unwrap();
        let t = transfer(dir.path(), "a.txt");
        fs::write(&t.from, vec![1u8; 4096]).unwrap();
        fs::write(&t.to, vec![2u8; 4096]).unwrap();

        let handle = CopyHandle::new();
        let mut events = Vec::new();
        start(t.clone(), &handle, |e| events.push(e));

        assert_eq!(
            events,
            vec![
                CopyEvent::CopyStart(t.clone()),
                CopyEvent::CopyFailed(t, CopyError::FileExists)
            ]
        );
    }

    #[test]
    fn cancellation_mid_copy_removes_partial_destination() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let t = transfer(dir.path(), "big.bin");
        fs::write(&t.from, vec![9u8; CHUNK_SIZE * 3]).unwrap();

        let handle = CopyHandle::new();
        let handle_for_cancel = Arc::clone(&handle);
        let mut chunk_count = 0;
        let mut events = Vec::new();
        start(t.clone(), &handle, |e| {
            if let CopyEvent::Copy(_, _) = &e {
                chunk_count += 1;
                if chunk_count == 1 {
                    handle_for_cancel.cancel();
                }
            }
            events.push(e);
        });

        assert_eq!(events.last(), Some(&CopyEvent::CopyCanceled(t.clone())));
        assert!(!t.to.exists());
    }

    #[test]
    fn is_up_to_date_is_false_on_size_mismatch() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, b"hello").unwrap();
        fs::write(&dst, b"hello world").unwrap();

        assert!(!is_up_to_date(&src, &dst));
    }

    #[test]
    fn is_up_to_date_is_false_when_destination_missing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();

        assert!(!is_up_to_date(&src, &dir.path().join("missing.txt")));
    }
}
