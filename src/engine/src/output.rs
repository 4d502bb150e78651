//! Output-file policy.
//!
//! The output file is created lazily, once a target entry has been
//! identified: missing parent directories are created (mode 0755),
//! then the file (mode 0644), then the bytes are copied in order. A
//! partial file left behind by a failed write is not removed; callers
//! treat the output path as indeterminate unless the call succeeded.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use ocipeek_core::Result;

/// Create `path` (and its parents) and write `data` to it.
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut out = create_file(path)?;
    out.write_all(data)?;
    out.flush()?;
    Ok(())
}

/// Create `path` (mode 0644) after creating its missing parent
/// directories (mode 0755).
pub(crate) fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?)
}
