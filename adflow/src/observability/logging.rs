//! Structured logging setup.
//!
//! The library itself only emits `tracing` events; binaries and tests that
//! want output call [`init_logging`] once.

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::AdflowError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV_VAR: &str = "ADFLOW_LOG";

/// Builds the event filter. `ADFLOW_LOG` takes precedence over the config.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, AdflowError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        AdflowError::Configuration(format!("invalid log level '{}': {e}", config.level))
    })
}

/// Installs the global subscriber.
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), AdflowError> {
    let filter = build_env_filter(config)?;
    let registry = Registry::default().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stdout))
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(config.ansi)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
    };

    result.map_err(|e| AdflowError::Configuration(format!("failed to install logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_configuration_error() {
        if std::env::var(LOG_ENV_VAR).is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "adflow=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(build_env_filter(&config), Err(AdflowError::Configuration(_))));
    }

    #[test]
    fn test_valid_level_builds_filter() {
        let config = LoggingConfig::default();
        assert!(build_env_filter(&config).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
