//! Staging: in-flight files that become visible only by rename.
//!
//! Writers never touch a live artifact or sidecar. They write into a
//! staging file in the same module directory (so the final rename stays on
//! one filesystem and is atomic), then persist it over the destination.
//! A staging file that is dropped without being persisted deletes itself,
//! so aborted writes leave nothing behind.
//!
//! Layout:
//! ```text
//! {module dir}/
//! ├── module.zip
//! ├── module.hash
//! ├── .staging-9f2c....zip    # in-progress artifact
//! └── .staging-9f2c....hash   # in-progress sidecar
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// File name prefix of every staging file.
pub const STAGING_PREFIX: &str = ".staging-";

/// Random id shared by the staging files of one write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingId(String);

impl StagingId {
    /// Generate a new random staging ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for this id with the given extension.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}{}.{}", STAGING_PREFIX, self.0, extension)
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a directory entry is a staging file.
pub fn is_staging_name(file_name: &str) -> bool {
    file_name.starts_with(STAGING_PREFIX)
}

/// A handle to a staging file. Deleted on drop unless persisted.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    file: Option<File>,
    persisted: bool,
}

impl StagingFile {
    /// Create a new, empty staging file in `dir`.
    pub fn create(dir: &Path, id: &StagingId, extension: &str) -> io::Result<Self> {
        let path = dir.join(id.file_name(extension));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Some(file),
            persisted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync data to disk (fsync).
    pub fn sync(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref file) => file.sync_all(),
            None => Ok(()),
        }
    }

    /// Close the handle and atomically rename the file over `dest`.
    pub fn persist(mut self, dest: &Path) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        fs::rename(&self.path, dest)?;
        self.persisted = true;
        Ok(())
    }
}

impl Write for StagingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file {
            Some(ref mut file) => file.write(buf),
            None => Err(io::Error::other("staging file already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.file = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}
