//! Logging setup for the CLI

use anyhow::{anyhow, Result};
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when no filter is given (e.g. "info", "debug")
    pub level: String,
    /// Emit one JSON object per event
    pub json_format: bool,
    /// Multi-line human readable output
    pub pretty_print: bool,
    /// Directive string such as "erpgate_pool=debug,erpgate_scaler=info"
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Quiet logging that keeps stdout usable for JSON reports
    pub fn quiet() -> Self {
        Self {
            level: "warn".to_string(),
            ..Self::default()
        }
    }

    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            pretty_print: true,
            env_filter: Some("erpgate=debug,erpgate_pool=debug,erpgate_scaler=debug".to_string()),
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the config.
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let directives = config.env_filter.as_deref().unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_format {
        registry.with(Layer::new().with_writer(io::stderr).json()).try_init()
    } else if config.pretty_print {
        registry.with(Layer::new().with_writer(io::stderr).pretty()).try_init()
    } else {
        registry.with(Layer::new().with_writer(io::stderr)).try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;

    tracing::debug!(
        target: "erpgate::logging",
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LoggingConfig::default().level, "info");
        assert_eq!(LoggingConfig::quiet().level, "warn");

        let verbose = LoggingConfig::verbose().with_json(true);
        assert!(verbose.json_format);
        assert!(verbose.env_filter.unwrap().contains("erpgate_scaler=debug"));
    }
}
