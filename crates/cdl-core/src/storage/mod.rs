//! Partial-file lifecycle for transfer units.
//!
//! Bytes land in `<destination>.part`, appended in order. The transfer loop
//! fsyncs before it persists a resume cursor, so a persisted cursor never
//! exceeds the bytes durably on disk. On completion the part file is
//! atomically renamed to the destination.

mod part;

pub use part::PartFile;

use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `01-intro.mp4` → `01-intro.mp4.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Remove the part file for `final_path` if present. Missing files are not an error.
pub fn discard_partial(final_path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(temp_path(final_path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// True if `final_path` already exists with exactly `expected_size` bytes.
pub fn already_complete(final_path: &Path, expected_size: u64) -> bool {
    std::fs::metadata(final_path)
        .map(|m| m.is_file() && m.len() == expected_size)
        .unwrap_or(false)
}
