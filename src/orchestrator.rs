//! Orchestrator
//!
//! Wires configuration into running parts: resolves each configured type
//! through the [`PluginRegistry`], attaches one [`PluginInstance`] per entry,
//! creates their databases and owns the poll and render timers. It is also
//! the boundary the view layer reads from.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::collector::{
    CollectorError, PluginInstance, PluginRegistry, PluginSnapshot, RegistryError,
};
use crate::config::{AppConfig, ConfigError};
use crate::limiter::{ConcurrencyLimiter, LimiterError};
use crate::render::{
    RenderContext, RenderError, RenderInvalidationMap, RenderScheduler, RenderTimers, image_name,
};
use crate::store::{CreateOutcome, RrdTool, StoreAdapter, StoreBackend, StoreError};

/// Startup and lifecycle errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A plugin type or alias could not be resolved.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A plugin rejected its options.
    #[error(transparent)]
    Collector(#[from] CollectorError),

    /// A database could not be created.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The render timers could not be set up.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The store limiter could not be built.
    #[error(transparent)]
    Limiter(#[from] LimiterError),

    /// Two entries share an id.
    #[error("duplicate plugin id: '{0}'")]
    DuplicateId(String),

    /// No plugin with this id is attached.
    #[error("unknown plugin: '{0}'")]
    UnknownPlugin(String),

    /// Filesystem error preparing directories.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Presentation order: `(sort_priority, id)`.
fn presentation_key(instance: &PluginInstance) -> (i32, &str) {
    (instance.sort_priority(), instance.id())
}

/// Owns every attached plugin and the render scheduler.
pub struct Orchestrator {
    registry: PluginRegistry,
    context: Arc<RenderContext>,
    store: StoreAdapter,
    plugins: Vec<Arc<PluginInstance>>,
    render: RenderScheduler,
    timers: Mutex<Option<RenderTimers>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("context", &self.context)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Attach every configured plugin over `backend`.
    ///
    /// Nothing is started yet; see [`Orchestrator::start`].
    ///
    /// # Errors
    /// Unknown plugin types, duplicate ids, invalid plugin options and invalid
    /// cadences are all reported here.
    pub fn new(
        config: AppConfig,
        mut registry: PluginRegistry,
        backend: Arc<dyn StoreBackend>,
    ) -> Result<Self, OrchestratorError> {
        let mut seen = HashSet::new();
        for entry in &config.plugins {
            if !seen.insert(entry.id.as_str()) {
                return Err(OrchestratorError::DuplicateId(entry.id.clone()));
            }
        }
        config.validate()?;

        let AppConfig {
            database_path,
            image_path,
            store_concurrency,
            draw_frequency,
            plugins: entries,
            ..
        } = config;

        let store = StoreAdapter::new(backend, ConcurrencyLimiter::new(store_concurrency)?);
        let context = Arc::new(RenderContext::new(database_path, image_path));

        let mut plugins = Vec::with_capacity(entries.len());
        for entry in entries {
            let resolved = registry.resolve(&entry.kind)?;
            let instance =
                PluginInstance::attach(entry, &resolved, &draw_frequency, &context, store.clone())?;
            plugins.push(Arc::new(instance));
        }

        let render = RenderScheduler::new(
            plugins.clone(),
            draw_frequency,
            Arc::clone(&context),
            store.clone(),
            RenderInvalidationMap::new(),
        );

        tracing::info!(
            plugins = plugins.len(),
            types = registry.resolved().count(),
            "Orchestrator initialized"
        );

        Ok(Self {
            registry,
            context,
            store,
            plugins,
            render,
            timers: Mutex::new(None),
        })
    }

    /// Built-in plugin types over the configured `rrdtool` binary.
    ///
    /// # Errors
    /// See [`Orchestrator::new`].
    pub fn from_config(config: AppConfig) -> Result<Self, OrchestratorError> {
        let backend = Arc::new(RrdTool::new(config.rrdtool.clone()));
        Self::new(config, PluginRegistry::with_builtin(), backend)
    }

    /// Load the configuration file (plus its include directory) and attach.
    ///
    /// # Errors
    /// `Config` for an unreadable or invalid file, otherwise see [`Orchestrator::new`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let config = AppConfig::load_with_plugin_path(path)?;
        Self::from_config(config)
    }

    /// Create the database of every plugin that owns one.
    ///
    /// Existing files are kept unless `overwrite` is set. Returns the number
    /// of databases written.
    ///
    /// # Errors
    /// The first creation failure; startup should not continue.
    pub async fn create_databases(&self, overwrite: bool) -> Result<usize, OrchestratorError> {
        tokio::fs::create_dir_all(self.context.database_path()).await?;

        let mut created = 0;
        for instance in &self.plugins {
            if !instance.uses_database() {
                tracing::debug!(plugin = %instance.id(), "Plugin has no database, skipping create");
                continue;
            }
            let outcome = self
                .store
                .create(instance.store_path(), &instance.schema(), overwrite)
                .await?;
            if outcome == CreateOutcome::Created {
                created += 1;
            }
        }

        tracing::info!(created, total = self.plugins.len(), "Databases ready");
        Ok(created)
    }

    /// Arm every poll timer and the render timers.
    ///
    /// # Errors
    /// `Render` if the render timers cannot be started.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let mut timers = self.timers.lock().await;
        if timers.is_some() {
            tracing::warn!("Orchestrator already started");
            return Ok(());
        }

        tokio::fs::create_dir_all(self.context.image_path()).await?;

        for instance in &self.plugins {
            instance.run();
        }
        *timers = Some(self.render.start().await?);

        tracing::info!(plugins = self.plugins.len(), "Orchestrator started");
        Ok(())
    }

    /// Stop the render timers, then every poll timer.
    ///
    /// In-flight cycles and render ticks finish on their own.
    pub async fn shutdown(&self) {
        if let Some(timers) = self.timers.lock().await.take()
            && let Err(e) = timers.shutdown().await
        {
            tracing::error!(error = %e, "Failed to stop render timers");
        }

        for instance in &self.plugins {
            instance.stop();
        }
        tracing::info!("Orchestrator stopped");
    }

    /// Plugins in configuration order.
    pub fn plugins(&self) -> &[Arc<PluginInstance>] {
        &self.plugins
    }

    /// Plugins in presentation order, `(sort_priority, id)` ascending.
    pub fn active_plugins(&self) -> Vec<Arc<PluginInstance>> {
        let mut plugins = self.plugins.clone();
        plugins.sort_by(|a, b| presentation_key(a).cmp(&presentation_key(b)));
        plugins
    }

    /// Snapshots in presentation order.
    pub fn snapshots(&self) -> Vec<PluginSnapshot> {
        self.active_plugins()
            .iter()
            .map(|instance| instance.snapshot())
            .collect()
    }

    /// Plugin by id.
    pub fn plugin(&self, id: &str) -> Option<&Arc<PluginInstance>> {
        self.plugins.iter().find(|instance| instance.id() == id)
    }

    /// Image file of plugin `id` for `period` and graph `alias`.
    ///
    /// # Errors
    /// `UnknownPlugin` for an unknown id, `Registry` for an unknown alias.
    pub fn image_file(
        &self,
        id: &str,
        period: &str,
        alias: &str,
    ) -> Result<PathBuf, OrchestratorError> {
        let instance = self
            .plugin(id)
            .ok_or_else(|| OrchestratorError::UnknownPlugin(id.to_string()))?;
        let index = instance.aliases().index_of(alias)?;
        Ok(self.context.image_file(&image_name(id, period, index)))
    }

    /// Last render time of every image.
    pub fn invalidation(&self) -> &RenderInvalidationMap {
        self.render.invalidation()
    }

    /// Directory and path helpers.
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// The render scheduler.
    pub fn render_scheduler(&self) -> &RenderScheduler {
        &self.render
    }

    /// Registry with every resolved type.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }
}
