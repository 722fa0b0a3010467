//! Config sections. Each one carries its own compiled defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Storage root for module directories.
    /// Default: ~/.modhost/modules
    #[serde(default = "PathsConfig::default_modules_dir")]
    pub modules_dir: PathBuf,
}

impl PathsConfig {
    fn default_modules_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".modhost/modules"))
            .unwrap_or_else(|| PathBuf::from(".modhost/modules"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            modules_dir: Self::default_modules_dir(),
        }
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Interface to bind.
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8080
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        8080
    }

    /// `host:port` string suitable for a socket bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Size and time limits applied to uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted module archive.
    /// Default: 5 MiB
    #[serde(default = "LimitsConfig::default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// How long an upload waits for a busy module.
    /// Default: 5000
    #[serde(default = "LimitsConfig::default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which an abandoned module lock is broken.
    /// Default: 60000
    #[serde(default = "LimitsConfig::default_stale_lock_ms")]
    pub stale_lock_ms: u64,

    /// Overall deadline for one upload, lock wait included.
    /// Default: 30000
    #[serde(default = "LimitsConfig::default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

impl LimitsConfig {
    fn default_max_upload_bytes() -> u64 {
        5 * 1024 * 1024
    }

    fn default_lock_timeout_ms() -> u64 {
        5_000
    }

    fn default_stale_lock_ms() -> u64 {
        60_000
    }

    fn default_upload_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: Self::default_max_upload_bytes(),
            lock_timeout_ms: Self::default_lock_timeout_ms(),
            stale_lock_ms: Self::default_stale_lock_ms(),
            upload_timeout_ms: Self::default_upload_timeout_ms(),
        }
    }
}

/// Upload credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in the `Authorization` header.
    /// No token means uploads are disabled.
    #[serde(default)]
    pub upload_token: Option<String>,
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// Append logs to this file instead of stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            log_file: None,
        }
    }
}
