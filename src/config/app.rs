//! Application configuration structures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::limiter::DEFAULT_CAPACITY;
use crate::render::CadenceTable;
use crate::store::DEFAULT_RRDTOOL;

use super::plugin::{PluginEntry, load_plugin_dir};
use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default number of concurrent store operations.
pub const DEFAULT_STORE_CONCURRENCY: usize = DEFAULT_CAPACITY;

fn default_rrdtool() -> PathBuf {
    PathBuf::from(DEFAULT_RRDTOOL)
}

fn default_store_concurrency() -> usize {
    DEFAULT_STORE_CONCURRENCY
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// ```yaml
/// database_path: /var/lib/prickle
/// image_path: /var/www/prickle
/// draw_frequency:
///   hour: 30
/// plugins:
///   - id: cache1
///     type: memcached
///     host: 10.0.0.3
///     periods: [hour, day]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one database per plugin.
    pub database_path: PathBuf,

    /// Directory rendered images are written to.
    pub image_path: PathBuf,

    /// Store tool binary (default: "rrdtool").
    #[serde(default = "default_rrdtool")]
    pub rrdtool: PathBuf,

    /// Concurrent store operations (default: 10).
    #[serde(default = "default_store_concurrency")]
    pub store_concurrency: usize,

    /// Seconds between renders per period; built-in cadences fill the gaps.
    #[serde(default, alias = "graph_draw_frequency")]
    pub draw_frequency: CadenceTable,

    /// Configured plugin instances.
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,

    /// Directory with additional plugin files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_path: Option<PathBuf>,
}

impl AppConfig {
    /// Configuration over the given directories with defaults everywhere else.
    pub fn new(database_path: impl Into<PathBuf>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            image_path: image_path.into(),
            rrdtool: default_rrdtool(),
            store_concurrency: DEFAULT_STORE_CONCURRENCY,
            draw_frequency: CadenceTable::default(),
            plugins: Vec::new(),
            plugin_path: None,
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including the `plugin_path` directory.
    ///
    /// Entries from the directory are appended after the inline ones.
    ///
    /// # Errors
    /// Returns `ConfigError` if any file cannot be read, parsed, or validated.
    pub fn load_with_plugin_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;

        if let Some(ref plugin_dir) = config.plugin_path {
            let additional = load_plugin_dir(plugin_dir)?;
            tracing::debug!(
                path = %plugin_dir.display(),
                count = additional.len(),
                "Loaded plugin include directory"
            );
            config.plugins.extend(additional);
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse a file as written, before defaults and expansion.
    fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Merge built-in cadences and expand `${VAR}` references.
    fn normalize(&mut self) {
        self.draw_frequency = std::mem::take(&mut self.draw_frequency).with_defaults();
        for entry in &mut self.plugins {
            entry.expand_env();
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "store_concurrency must be positive".to_string(),
            ));
        }

        self.draw_frequency
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("draw_frequency: {e}")))?;

        let mut ids = HashSet::new();
        for entry in &self.plugins {
            entry.validate()?;
            if !ids.insert(entry.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate plugin id: '{}'",
                    entry.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginOptions;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn test_load_applies_defaults() {
        let file = write_config(
            r#"
database_path: /var/lib/prickle
image_path: /srv/images
plugins:
  - id: cache1
    type: memcached
    host: 10.0.0.3
    periods: [hour, day]
"#,
        );

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.rrdtool, PathBuf::from(DEFAULT_RRDTOOL));
        assert_eq!(config.store_concurrency, DEFAULT_STORE_CONCURRENCY);
        assert_eq!(config.draw_frequency, CadenceTable::default());
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].kind, "memcached");
        assert_eq!(config.plugins[0].options.host.as_deref(), Some("10.0.0.3"));
    }

    #[test]
    fn test_user_cadences_override_builtin() {
        let file = write_config(
            r#"
database_path: db
image_path: img
graph_draw_frequency:
  hour: 30
  month: 3600
"#,
        );

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.draw_frequency.get("hour"), Some(30));
        assert_eq!(config.draw_frequency.get("month"), Some(3600));
        assert_eq!(config.draw_frequency.get("day"), Some(300));
        assert_eq!(config.draw_frequency.get("default"), Some(60));
    }

    #[test]
    fn test_load_expands_env() {
        // SAFETY: test-only variable with a unique name.
        unsafe { std::env::set_var("PRICKLE_TEST_APP_DB_PASSWORD", "hunter2") };
        let file = write_config(
            r#"
database_path: db
image_path: img
plugins:
  - id: db1
    type: mysql
    host: localhost
    user: monitor
    passwd: ${PRICKLE_TEST_APP_DB_PASSWORD}
"#,
        );

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(
            config.plugins[0].options.password.as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            AppConfig::load("/nonexistent/prickle.yaml"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_load_with_plugin_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("10-web.yaml"),
            "plugins:\n  - id: web1\n    type: nginx\n    host: 10.0.0.5\n",
        )
        .unwrap();

        let file = write_config(&format!(
            "database_path: db\nimage_path: img\nplugin_path: {}\nplugins:\n  - id: cache1\n    type: memcached\n    host: h\n",
            dir.path().display()
        ));

        let config = AppConfig::load_with_plugin_path(file.path()).unwrap();
        let ids: Vec<_> = config.plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["cache1", "web1"]);
    }

    #[test]
    fn test_load_with_plugin_path_expands_once() {
        // SAFETY: test-only variables with unique names.
        unsafe {
            std::env::set_var("PRICKLE_TEST_NESTED_PASSWORD", "${PRICKLE_TEST_NESTED_INNER}");
            std::env::set_var("PRICKLE_TEST_NESTED_INNER", "expanded-twice");
        }

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("20-db.yaml"),
            "plugins:\n  - id: db2\n    type: mysql\n    host: h\n    user: u\n    passwd: ${PRICKLE_TEST_NESTED_PASSWORD}\n",
        )
        .unwrap();
        let file = write_config(&format!(
            "database_path: db\nimage_path: img\nplugin_path: {}\nplugins:\n  - id: db1\n    type: mysql\n    host: h\n    user: u\n    passwd: ${{PRICKLE_TEST_NESTED_PASSWORD}}\n",
            dir.path().display()
        ));

        let config = AppConfig::load_with_plugin_path(file.path()).unwrap();
        for entry in &config.plugins {
            assert_eq!(
                entry.options.password.as_deref(),
                Some("${PRICKLE_TEST_NESTED_INNER}")
            );
        }
        assert_eq!(config.plugins.len(), 2);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_validate_duplicate_ids() {
        let mut config = AppConfig::new("db", "img");
        config.plugins = vec![
            PluginEntry::new("web1", "nginx"),
            PluginEntry::new("web1", "memcached"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate plugin id"));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = AppConfig::new("db", "img");
        config.store_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cadences() {
        let mut config = AppConfig::new("db", "img");
        config.draw_frequency = CadenceTable::new([("hour", 60)]);
        assert!(config.validate().is_err());

        config.draw_frequency = CadenceTable::new([("hour", 0), ("default", 60)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unscheduled_period_allowed() {
        let mut config = AppConfig::new("db", "img");
        config.plugins = vec![
            PluginEntry::new("web1", "nginx")
                .with_periods(["hour", "year"])
                .with_options(PluginOptions::for_host("h")),
        ];
        assert!(config.validate().is_ok());
    }
}
