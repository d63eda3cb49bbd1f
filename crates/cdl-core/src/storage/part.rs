//! Append-only writer for one unit's `.part` file.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::temp_path;

/// Open `.part` file positioned at its end. Not shared: one transfer owns it.
#[derive(Debug)]
pub struct PartFile {
    file: File,
    temp_path: PathBuf,
    len: u64,
}

impl PartFile {
    /// Open (or create) the part file for `final_path` and reconcile it with
    /// the persisted `cursor`.
    ///
    /// If the file length equals `cursor`, writing resumes at the end. Any
    /// other length (missing file, torn write past the cursor, stale cursor
    /// past the file) restarts the unit from zero.
    pub fn open_for_resume(final_path: &Path, cursor: u64) -> io::Result<Self> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = temp_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&temp_path)?;
        let on_disk = file.metadata()?.len();
        let len = if on_disk == cursor {
            cursor
        } else {
            tracing::debug!(
                path = %temp_path.display(),
                on_disk,
                cursor,
                "part file does not match cursor; restarting from zero"
            );
            file.set_len(0)?;
            0
        };
        let mut part = PartFile {
            file,
            temp_path,
            len,
        };
        part.seek_end()?;
        Ok(part)
    }

    fn seek_end(&mut self) -> io::Result<()> {
        use std::io::{Seek, SeekFrom};
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }

    /// Bytes written so far (the resume offset).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Flush file data to disk. Call before persisting `len()` as a cursor.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    /// Sync and atomically rename the part file to `final_path`.
    pub fn finalize(mut self, final_path: &Path) -> io::Result<()> {
        self.sync()?;
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::rename(&temp_path, final_path)
    }

    /// Close and delete the part file.
    pub fn discard(self) -> io::Result<()> {
        let temp_path = self.temp_path.clone();
        drop(self.file);
        match std::fs::remove_file(&temp_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
