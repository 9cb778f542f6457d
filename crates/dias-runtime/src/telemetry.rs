//! Tracing subscriber setup

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dias_core::{DiasError, DiasResult};

use crate::LogConfig;

/// Environment variable overriding the configured filter
pub const LOG_ENV: &str = "DIAS_LOG";

/// Filter from `DIAS_LOG`, falling back to `config.level`
pub fn log_filter(config: &LogConfig) -> DiasResult<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(&directives)
                .map_err(|e| DiasError::Config(format!("{}: {}", LOG_ENV, e)))
        }
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| DiasError::Config(format!("log level: {}", e))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> DiasResult<()> {
    let filter = log_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| DiasError::Config(format!("tracing already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_config_error() {
        let config = LogConfig {
            level: "dias=notalevel".into(),
            json: false,
        };
        if std::env::var(LOG_ENV).is_err() {
            assert!(matches!(log_filter(&config), Err(DiasError::Config(_))));
        }
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default();
        // another test may have installed the subscriber already
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
