//! Atomic file replacement.

use std::io::{self, Write};
use std::path::Path;

/// Writes `data` to `target` so that readers see either the old or the new
/// contents, never a partial file.
///
/// The bytes go to a temporary file in the same directory, which is synced
/// and then renamed over the target.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", target.display()),
        )
    })?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.as_file_mut().write_all(data)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
