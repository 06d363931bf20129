//! Configuration errors and `${VAR}` expansion for plugin options.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env reference regex")
    })
}

/// Substitute environment references in a plugin option value.
///
/// Lets secrets and per-host settings stay out of the config file:
///
/// ```yaml
/// plugins:
///   - id: db1
///     type: mysql
///     host: ${MYSQL_HOST:-127.0.0.1}
///     user: monitor
///     passwd: ${MYSQL_MONITOR_PASSWORD}
/// ```
///
/// `${VAR}` becomes the variable's value, or nothing when it is unset.
/// `${VAR:-fallback}` uses `fallback` when unset. The substituted text is
/// not scanned again.
pub fn expand_env_vars(value: &str) -> String {
    env_reference()
        .replace_all(value, |caps: &Captures| {
            std::env::var(&caps[1])
                .ok()
                .or_else(|| caps.get(2).map(|fallback| fallback.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}
