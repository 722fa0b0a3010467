//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ModhostConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/modhost/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("modhost/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("modhost.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a single config file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<ModhostConfig, ConfigError> {
    let mut config = ModhostConfig::default();
    overlay_file(&mut config, path)?;
    Ok(config)
}

/// Apply the keys present in `path` to `config`. Absent keys keep their current value.
pub fn overlay_file(config: &mut ModhostConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

fn overlay_toml(config: &mut ModhostConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let fields = Fields { table: &table, path };

    if let Some(v) = fields.string("paths", "modules_dir")? {
        config.paths.modules_dir = expand_path(&v);
    }

    if let Some(v) = fields.string("bind", "host")? {
        config.bind.host = v;
    }
    if let Some(v) = fields.unsigned("bind", "http_port")? {
        config.bind.http_port = u16::try_from(v).map_err(|_| fields.invalid("bind", "http_port", "a port number"))?;
    }

    if let Some(v) = fields.unsigned("limits", "max_upload_bytes")? {
        config.limits.max_upload_bytes = v;
    }
    if let Some(v) = fields.unsigned("limits", "lock_timeout_ms")? {
        config.limits.lock_timeout_ms = v;
    }
    if let Some(v) = fields.unsigned("limits", "stale_lock_ms")? {
        config.limits.stale_lock_ms = v;
    }
    if let Some(v) = fields.unsigned("limits", "upload_timeout_ms")? {
        config.limits.upload_timeout_ms = v;
    }

    if let Some(v) = fields.string("auth", "upload_token")? {
        config.auth.upload_token = non_empty(v);
    }

    if let Some(v) = fields.string("telemetry", "log_level")? {
        config.telemetry.log_level = v;
    }
    if let Some(v) = fields.string("telemetry", "log_file")? {
        config.telemetry.log_file = non_empty(v).map(|v| expand_path(&v));
    }

    Ok(())
}

/// Typed access to `[section] key` pairs of one parsed file.
struct Fields<'a> {
    table: &'a toml::Table,
    path: &'a Path,
}

impl Fields<'_> {
    fn get(&self, section: &str, key: &str) -> Option<&toml::Value> {
        self.table
            .get(section)
            .and_then(|v| v.as_table())
            .and_then(|t| t.get(key))
    }

    fn string(&self, section: &str, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.invalid(section, key, "a string")),
        }
    }

    fn unsigned(&self, section: &str, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(v) => v
                .as_integer()
                .and_then(|i| u64::try_from(i).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(section, key, "a non-negative integer")),
        }
    }

    fn invalid(&self, section: &str, key: &str, expected: &str) -> ConfigError {
        ConfigError::Parse {
            path: self.path.to_path_buf(),
            message: format!("{}.{} must be {}", section, key, expected),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ModhostConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from any key lookup. Later entries in a group win.
pub fn apply_overrides_from(
    config: &mut ModhostConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let mut take = |key: &str| {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("MODHOST_MODULES_DIR") {
        config.paths.modules_dir = expand_path(&v);
    }

    if let Some(v) = take("MODHOST_HOST") {
        config.bind.host = v;
    }
    // Legacy PORT first so the namespaced variable wins when both are set
    for key in ["PORT", "MODHOST_HTTP_PORT"] {
        if let Some(port) = lookup(key).and_then(|v| v.trim().parse().ok()) {
            config.bind.http_port = port;
            take(key);
        }
    }

    for (key, slot) in [
        ("MODHOST_MAX_UPLOAD_BYTES", &mut config.limits.max_upload_bytes),
        ("MODHOST_LOCK_TIMEOUT_MS", &mut config.limits.lock_timeout_ms),
        ("MODHOST_STALE_LOCK_MS", &mut config.limits.stale_lock_ms),
        ("MODHOST_UPLOAD_TIMEOUT_MS", &mut config.limits.upload_timeout_ms),
    ] {
        if let Some(n) = lookup(key).and_then(|v| v.trim().parse().ok()) {
            *slot = n;
            take(key);
        }
    }

    for key in ["UPLOAD_TOKEN", "MODHOST_UPLOAD_TOKEN"] {
        if let Some(v) = take(key) {
            config.auth.upload_token = non_empty(v);
        }
    }

    // RUST_LOG last, it is the most specific knob
    for key in ["MODHOST_LOG_LEVEL", "RUST_LOG"] {
        if let Some(v) = take(key) {
            config.telemetry.log_level = v;
        }
    }

    for key in ["LOG_TO_FILE", "MODHOST_LOG_FILE"] {
        if let Some(v) = take(key) {
            config.telemetry.log_file = non_empty(v).map(|v| expand_path(&v));
        }
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
