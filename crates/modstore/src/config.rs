//! Store configuration.
//!
//! Built once at startup (usually from `modconf`) and handed to
//! [`FileModuleStore::new`](crate::FileModuleStore::new). Nothing in this
//! crate reads the environment, so tests can run side by side with distinct
//! roots.
//!
//! Default path: `~/.modhost/modules`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::lock::LockPolicy;

/// Configuration for the module artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage root. One directory per module lives directly below it.
    pub base_path: PathBuf,

    /// Largest artifact accepted by `put`, in bytes.
    #[serde(default = "StoreConfig::default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,

    /// How long `put` waits for a contended module lock.
    #[serde(default = "StoreConfig::default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which a lock sentinel is considered abandoned and may be broken.
    #[serde(default = "StoreConfig::default_stale_lock_ms")]
    pub stale_lock_ms: u64,

    /// Read-only mode - rejects `put` and `repair`.
    #[serde(default)]
    pub read_only: bool,
}

impl StoreConfig {
    fn default_max_artifact_bytes() -> u64 {
        5 * 1024 * 1024
    }

    fn default_lock_timeout_ms() -> u64 {
        5_000
    }

    fn default_stale_lock_ms() -> u64 {
        60_000
    }

    fn default_base_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".modhost").join("modules"))
            .unwrap_or_else(|| PathBuf::from(".modhost/modules"))
    }

    /// Create a config with a specific base path and default limits.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            ..Self::default()
        }
    }

    /// Create a read-only config with a specific base path.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_max_artifact_bytes(mut self, bytes: u64) -> Self {
        self.max_artifact_bytes = bytes;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stale_lock_after(mut self, threshold: Duration) -> Self {
        self.stale_lock_ms = threshold.as_millis() as u64;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_millis(self.stale_lock_ms)
    }

    /// Lock acquisition policy derived from the timeouts above.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy::new(self.lock_timeout(), self.stale_lock_after())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: Self::default_base_path(),
            max_artifact_bytes: Self::default_max_artifact_bytes(),
            lock_timeout_ms: Self::default_lock_timeout_ms(),
            stale_lock_ms: Self::default_stale_lock_ms(),
            read_only: false,
        }
    }
}
