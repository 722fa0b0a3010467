//! Logging initialization.
//!
//! One `fmt` layer filtered by an `EnvFilter`. Output goes to stdout, or is
//! appended to the configured log file without ANSI colours.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use modconf::TelemetryConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_FILTER: &str = "info";

/// Install the global subscriber. Call once, before anything logs.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let (env_filter, rejected) = match EnvFilter::try_new(&config.log_level) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(FALLBACK_FILTER), Some(e)),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        None => {
            registry
                .with(fmt::layer())
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
    }

    if let Some(e) = rejected {
        tracing::warn!(
            log_level = %config.log_level,
            error = %e,
            "invalid log filter, falling back to {}",
            FALLBACK_FILTER
        );
    }

    Ok(())
}
