//! Error taxonomy of the module store.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::hash::HashError;
use crate::lock::LockError;
use crate::name::NameError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Every failure the store can report. Callers branch on the variant.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("timed out after {waited:?} waiting for the lock on module {module}")]
    LockTimeout { module: String, waited: Duration },

    #[error("payload exceeds the maximum artifact size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("deadline exceeded while writing module {0}")]
    DeadlineExceeded(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("corrupt hash sidecar {path}: {source}")]
    CorruptSidecar {
        path: PathBuf,
        #[source]
        source: HashError,
    },

    #[error("module store is read-only")]
    ReadOnly,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl From<LockError> for StoreError {
    fn from(err: LockError) -> Self {
        // Lock files live directly inside the module directory.
        let module_of = |path: &std::path::Path| {
            path.parent()
                .and_then(|dir| dir.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        match err {
            LockError::Timeout { path, waited } => Self::LockTimeout {
                module: module_of(&path),
                waited,
            },
            LockError::DeadlineExceeded(path) => Self::DeadlineExceeded(module_of(&path)),
            LockError::Io { path, source } => {
                Self::io(format!("lock failure on {}", path.display()), source)
            }
        }
    }
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the same call may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::DeadlineExceeded(_) | Self::Io { .. }
        )
    }

    /// Whether the error means the module has no current artifact.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_maps_to_store_error() {
        let err = StoreError::from(LockError::Timeout {
            path: PathBuf::from("/m/demo/module.lock"),
            waited: Duration::from_secs(5),
        });
        assert!(matches!(err, StoreError::LockTimeout { ref module, .. } if module == "demo"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_deadline_maps_to_store_error() {
        let err = StoreError::from(LockError::DeadlineExceeded(PathBuf::from(
            "/m/audio.mixer/module.lock",
        )));
        assert!(matches!(err, StoreError::DeadlineExceeded(ref m) if m == "audio.mixer"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        assert!(!StoreError::PayloadTooLarge { limit: 1 }.is_retryable());
        assert!(!StoreError::InvalidName(NameError::Empty).is_retryable());
        assert!(StoreError::io("disk", io::Error::other("full")).is_retryable());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            StoreError::NotFound("demo".into()).to_string(),
            "module not found: demo"
        );
        assert_eq!(
            StoreError::PayloadTooLarge { limit: 10 }.to_string(),
            "payload exceeds the maximum artifact size of 10 bytes"
        );
    }
}
