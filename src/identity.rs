//! Stable, cross-rename file identity.
//!
//! Grounded on the teacher's same-file check
//! (`file_system/write_operations/helpers.rs::is_same_file`), which compares
//! `(dev, ino)` to detect source/destination aliasing. Here the pair is
//! promoted to a first-class value so [`crate::snapshot::DirSnapshot`] can use
//! it for rename inference: two paths with equal identity name the same
//! underlying file object, even after being renamed within the volume.

use std::path::Path;

/// Opaque `(volume, file)` identity pair. Two paths on the same volume with
/// equal identity denote the same underlying inode-equivalent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    volume_id: u64,
    file_id: u64,
}

/// Returns the stable identity of the file at `path`, or `None` if it could
/// not be determined (the path vanished between enumeration and this query,
/// or identity is unsupported on this platform).
///
/// Cheap: a single metadata query, no content is read.
#[cfg(unix)]
pub fn identity(path: &Path) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(path).ok()?;
    Some(FileIdentity {
        volume_id: meta.dev(),
        file_id: meta.ino(),
    })
}

#[cfg(not(unix))]
pub fn identity(_path: &Path) -> Option<FileIdentity> {
    // No portable stable-identity query without a platform-specific API
    // (e.g. GetFileInformationByHandle on Windows). Rename inference simply
    // never fires on such platforms — every rename shows up as a
    // Created/Removed pair instead, which DirSnapshot::poll already handles.
    None
}
