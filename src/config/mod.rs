//! Configuration module for prickle.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Store settings (database and image directories, rrdtool binary, concurrency)
//! - Render cadences (`draw_frequency`)
//! - Plugin instances, inline or from an include directory

mod app;
mod plugin;
mod validation;

pub use app::{AppConfig, DEFAULT_STORE_CONCURRENCY};
pub use plugin::{PluginEntry, PluginOptions, load_plugin_dir};
pub use validation::{ConfigError, expand_env_vars};
