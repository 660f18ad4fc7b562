//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_tracing`] once at startup.

use clustermux_core::{CacheError, CacheResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `clustermux_cache=debug,info`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `CLUSTERMUX_LOG` and `CLUSTERMUX_LOG_JSON`.
    pub fn from_env() -> Self {
        let filter = std::env::var("CLUSTERMUX_LOG")
            .ok()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json = std::env::var("CLUSTERMUX_LOG_JSON")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        Self { filter, json }
    }

    fn env_filter(&self) -> CacheResult<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|err| {
            CacheError::from(ConfigError::InvalidValue {
                field: "CLUSTERMUX_LOG".to_string(),
                value: self.filter.clone(),
                reason: err.to_string(),
            })
        })
    }
}

/// Install a global subscriber for `config`.
///
/// Returns `Ok(false)` when another subscriber is already installed; the
/// existing one is left in place. Invalid filter directives are an error.
pub fn init_tracing(config: &TelemetryConfig) -> CacheResult<bool> {
    let filter = config.env_filter()?;
    let (json, plain) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
    }
    Ok(installed)
}
