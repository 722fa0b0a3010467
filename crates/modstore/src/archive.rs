//! Read-only lookups inside a module archive.
//!
//! Only the zip central directory is parsed; the requested entry is located
//! by name and decompressed on its own, so reading the `info` record of a
//! large archive costs about the same as reading it from a small one.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

/// Name of the metadata entry every module archive is expected to carry.
pub const INFO_ENTRY: &str = "info";

/// Upper bound for a decoded metadata entry.
pub const MAX_INFO_BYTES: u64 = 1024 * 1024;

/// Errors from reading inside an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt archive {path}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("entry {entry:?} not found in archive {path}")]
    EntryNotFound { path: PathBuf, entry: String },

    #[error("malformed metadata in {path}: {message}")]
    MalformedMetadata { path: PathBuf, message: String },
}

/// Version marker from the metadata record. Keeps its JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    Number(i64),
    Text(String),
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Number(n) => write!(f, "{}", n),
            Revision::Text(s) => f.write_str(s),
        }
    }
}

/// Decoded `info` record: a revision plus free-form descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub revision: Revision,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ModuleInfo {
    /// Decode a metadata record from raw entry bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Extract the raw bytes of one entry without touching the rest of the archive.
pub fn read_entry(archive_path: &Path, entry_name: &str) -> Result<Vec<u8>, ArchiveError> {
    read_entry_limited(archive_path, entry_name, u64::MAX)
}

fn read_entry_limited(
    archive_path: &Path,
    entry_name: &str,
    limit: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::Io {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let corrupt = |message: String| ArchiveError::CorruptArchive {
        path: archive_path.to_path_buf(),
        message,
    };

    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

    let entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(ArchiveError::EntryNotFound {
                path: archive_path.to_path_buf(),
                entry: entry_name.to_string(),
            })
        }
        Err(e) => return Err(corrupt(e.to_string())),
    };

    if entry.size() > limit {
        return Err(ArchiveError::MalformedMetadata {
            path: archive_path.to_path_buf(),
            message: format!(
                "entry {:?} is {} bytes, limit is {}",
                entry_name,
                entry.size(),
                limit
            ),
        });
    }

    // The declared size can lie; cap the decompressed stream as well.
    let mut bytes = Vec::with_capacity(entry.size().min(64 * 1024) as usize);
    entry
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| corrupt(format!("failed to decompress {:?}: {}", entry_name, e)))?;

    if bytes.len() as u64 > limit {
        return Err(ArchiveError::MalformedMetadata {
            path: archive_path.to_path_buf(),
            message: format!("entry {:?} exceeds {} bytes", entry_name, limit),
        });
    }

    Ok(bytes)
}

/// Read and decode the archive's `info` record.
pub fn read_info(archive_path: &Path) -> Result<ModuleInfo, ArchiveError> {
    let bytes = read_entry_limited(archive_path, INFO_ENTRY, MAX_INFO_BYTES)?;
    ModuleInfo::from_bytes(&bytes).map_err(|e| ArchiveError::MalformedMetadata {
        path: archive_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read just the revision from the archive's `info` record.
pub fn read_revision(archive_path: &Path) -> Result<Revision, ArchiveError> {
    read_info(archive_path).map(|info| info.revision)
}
