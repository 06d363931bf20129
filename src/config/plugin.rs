//! Plugin instantiation entries.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};
use crate::render::DEFAULT_PERIOD;

/// Options handed to a plugin's `init` hook.
///
/// Well-known keys are typed; anything else lands in `extra`. Each plugin
/// type fills in its own defaults (port, status path, timeouts).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Monitored host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Monitored port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Login user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Login password; `${VAR}` references are expanded at load time.
    #[serde(default, alias = "passwd", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path of an HTTP status page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_path: Option<String>,

    /// Other plugin ids this one aggregates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,

    /// Connection establishment timeout.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<Duration>,

    /// Whole-request timeout.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Type-specific options without a typed field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PluginOptions {
    /// Options pointing at `host`.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the aggregated ids.
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    fn expand(&mut self) {
        for value in [
            &mut self.host,
            &mut self.user,
            &mut self.password,
            &mut self.status_path,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_env_vars(value);
        }
    }
}

/// One configured plugin instance.
///
/// ```yaml
/// - id: web1
///   type: nginx
///   host: 10.0.0.5
///   periods: [hour, day, week]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Unique instance id; also names the database and images.
    pub id: String,

    /// Plugin type name.
    #[serde(rename = "type", alias = "template")]
    pub kind: String,

    /// Periods to render.
    #[serde(default)]
    pub periods: Vec<String>,

    /// Poll interval override; `0s` disables polling.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    /// Arm the next poll only after the current cycle settles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_till_finish: Option<bool>,

    /// Options passed to the plugin.
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl PluginEntry {
    /// Entry with no periods and default options.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            periods: Vec::new(),
            interval: None,
            wait_till_finish: None,
            options: PluginOptions::default(),
        }
    }

    /// Set the rendered periods.
    pub fn with_periods<I, S>(mut self, periods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.periods = periods.into_iter().map(Into::into).collect();
        self
    }

    /// Set the options.
    pub fn with_options(mut self, options: PluginOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Expand `${VAR}` references in string options.
    pub fn expand_env(&mut self) {
        self.options.expand();
    }

    /// Validate this entry on its own.
    ///
    /// # Errors
    /// `ValidationError` for an empty id or type, or a reserved/repeated period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "plugin id must not be empty".to_string(),
            ));
        }
        if self.kind.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "plugin '{}' has no type",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for period in &self.periods {
            if period == DEFAULT_PERIOD {
                return Err(ConfigError::ValidationError(format!(
                    "plugin '{}': period '{}' is reserved",
                    self.id, DEFAULT_PERIOD
                )));
            }
            if !seen.insert(period.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "plugin '{}': duplicate period '{}'",
                    self.id, period
                )));
            }
        }
        Ok(())
    }
}

/// Plugin entries from one include file.
#[derive(Debug, Default, Deserialize)]
struct PluginFile {
    #[serde(default)]
    plugins: Vec<PluginEntry>,
}

/// Load plugin entries from all YAML files in a directory, in file-name order.
///
/// # Errors
/// `ValidationError` if `dir` is not a directory or a file fails to parse.
pub fn load_plugin_dir(dir: impl AsRef<Path>) -> Result<Vec<PluginEntry>, ConfigError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ConfigError::ValidationError(format!(
            "plugin_path '{}' is not a directory",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if path.is_file() && (ext == "yaml" || ext == "yml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut entries = Vec::new();
    for path in paths {
        tracing::debug!(path = %path.display(), "Loading plugin config");
        let content = std::fs::read_to_string(&path)?;
        let file: PluginFile = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
        })?;
        entries.extend(file.plugins);
    }
    Ok(entries)
}
