//! Free-space query for the volume holding the data directory.

use std::path::Path;

/// Free bytes on the filesystem containing `path`, or `None` when the
/// platform cannot tell. Callers treat `None` as "assume space".
#[cfg(unix)]
pub fn free_bytes(path: &Path) -> Option<u64> {
    match nix::sys::statvfs::statvfs(path) {
        Ok(vfs) => Some(vfs.blocks_available() as u64 * vfs.fragment_size() as u64),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "statvfs failed");
            None
        }
    }
}

#[cfg(not(unix))]
pub fn free_bytes(_path: &Path) -> Option<u64> {
    None
}
