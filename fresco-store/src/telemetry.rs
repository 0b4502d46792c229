//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Binaries and tests that want
//! to see them call [`init_tracing`] once at startup.

use fresco_core::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `"fresco_store=debug,info"`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: std::env::var("FRESCO_LOG").unwrap_or_else(|_| "info".to_string()),
            json: std::env::var("FRESCO_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

impl TelemetryConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so
/// repeated calls are harmless. Invalid filter directives are rejected.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool, ConfigError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "FRESCO_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = TelemetryConfig::default()
            .with_filter("fresco_store=debug")
            .with_json(true);
        assert_eq!(config.filter, "fresco_store=debug");
        assert!(config.json);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig::default().with_filter("fresco_store=notalevel");
        assert!(matches!(
            init_tracing(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TelemetryConfig::default().with_filter("warn");
        let first = init_tracing(&config).unwrap();
        let second = init_tracing(&config).unwrap();
        // Another test may have installed the subscriber first.
        assert!(!second);
        let _ = first;
    }
}
