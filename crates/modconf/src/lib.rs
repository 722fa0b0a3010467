//! Configuration loading for modhost.
//!
//! Kept separate from the store and the server so both can be configured
//! from the same file without depending on each other.
//!
//! # Usage
//!
//! ```rust,no_run
//! use modconf::ModhostConfig;
//!
//! let config = ModhostConfig::load().expect("Failed to load config");
//! println!("modules in {}", config.paths.modules_dir.display());
//! println!("listening on {}", config.bind.address());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/modhost/config.toml` (system)
//! 2. `~/.config/modhost/config.toml` (user)
//! 3. `./modhost.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`MODHOST_*`, plus `PORT`, `UPLOAD_TOKEN`,
//!    `RUST_LOG` and `LOG_TO_FILE`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! modules_dir = "~/.modhost/modules"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 8080
//!
//! [limits]
//! max_upload_bytes = 5242880
//! lock_timeout_ms = 5000
//! stale_lock_ms = 60000
//! upload_timeout_ms = 30000
//!
//! [auth]
//! upload_token = "change-me"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{AuthConfig, BindConfig, LimitsConfig, PathsConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete modhost configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModhostConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ModhostConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` standing in for `./modhost.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ModhostConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Check relations between settings that are valid on their own.
    ///
    /// An upload may hold a module lock for up to `upload_timeout_ms`, so
    /// that must stay below `stale_lock_ms` or a live writer could have its
    /// lock broken.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.upload_timeout_ms >= self.limits.stale_lock_ms {
            return Err(ConfigError::Invalid(format!(
                "limits.upload_timeout_ms ({}) must be less than limits.stale_lock_ms ({})",
                self.limits.upload_timeout_ms, self.limits.stale_lock_ms
            )));
        }
        Ok(())
    }

    /// Whether uploads are possible at all.
    pub fn uploads_enabled(&self) -> bool {
        self.auth.upload_token.is_some()
    }

    /// Serialize config to TOML string. The upload token is masked.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# modhost configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "modules_dir = \"{}\"\n",
            self.paths.modules_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.bind.host));
        output.push_str(&format!("http_port = {}\n", self.bind.http_port));

        output.push_str("\n[limits]\n");
        output.push_str(&format!(
            "max_upload_bytes = {}\n",
            self.limits.max_upload_bytes
        ));
        output.push_str(&format!("lock_timeout_ms = {}\n", self.limits.lock_timeout_ms));
        output.push_str(&format!("stale_lock_ms = {}\n", self.limits.stale_lock_ms));
        output.push_str(&format!(
            "upload_timeout_ms = {}\n",
            self.limits.upload_timeout_ms
        ));

        output.push_str("\n[auth]\n");
        match self.auth.upload_token {
            Some(_) => output.push_str("upload_token = \"********\"\n"),
            None => output.push_str("# upload_token unset: uploads are disabled\n"),
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));
        if let Some(file) = &self.telemetry.log_file {
            output.push_str(&format!("log_file = \"{}\"\n", file.display()));
        }

        output
    }
}
