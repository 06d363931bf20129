//! Limiter-guarded entry points into the store tool.

use std::path::Path;
use std::sync::Arc;

use crate::limiter::ConcurrencyLimiter;
use crate::store::{StoreBackend, StoreCommand, StoreError};

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new database file was written.
    Created,
    /// The file already existed and overwrite was not requested.
    Existing,
}

/// Async bridge to the store tool.
///
/// All three operations share one [`ConcurrencyLimiter`], so the number of
/// concurrent invocations is bounded independently of plugin count.
#[derive(Clone)]
pub struct StoreAdapter {
    backend: Arc<dyn StoreBackend>,
    limiter: ConcurrencyLimiter,
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl StoreAdapter {
    /// Create an adapter over `backend`, admitting calls through `limiter`.
    pub fn new(backend: Arc<dyn StoreBackend>, limiter: ConcurrencyLimiter) -> Self {
        Self { backend, limiter }
    }

    /// Limiter shared by every store invocation.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Create the database at `path` from `schema` directives.
    ///
    /// Startup-only. An existing file is left alone unless `overwrite` is set.
    ///
    /// # Errors
    /// Any failure here is fatal for the caller: the plugin has nowhere to write.
    pub async fn create(
        &self,
        path: &Path,
        schema: &[String],
        overwrite: bool,
    ) -> Result<CreateOutcome, StoreError> {
        if path.exists() && !overwrite {
            tracing::info!(path = %path.display(), "Database already exists, not overwriting");
            return Ok(CreateOutcome::Existing);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.invoke(StoreCommand::Create, path, schema).await?;
        tracing::info!(path = %path.display(), "Database created");
        Ok(CreateOutcome::Created)
    }

    /// Append one formatted sample (e.g. `N:1:2:3`) to the database at `path`.
    ///
    /// Failures are logged here and returned so the caller can count them;
    /// they never stop the poll schedule.
    pub async fn update(&self, path: &Path, sample: &str) -> Result<(), StoreError> {
        self.invoke(StoreCommand::Update, path, &[sample.to_string()])
            .await
            .inspect_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Store update failed");
            })
    }

    /// Render an image to `output` from `directives`.
    ///
    /// Failures are logged and returned; sibling renders are unaffected.
    pub async fn render(&self, output: &Path, directives: &[String]) -> Result<(), StoreError> {
        tracing::debug!(output = %output.display(), "Rendering graph");
        self.invoke(StoreCommand::Render, output, directives)
            .await
            .inspect_err(|e| {
                tracing::warn!(output = %output.display(), error = %e, "Render failed");
            })
    }

    async fn invoke(
        &self,
        command: StoreCommand,
        path: &Path,
        args: &[String],
    ) -> Result<(), StoreError> {
        self.limiter
            .run(self.backend.invoke(command, path, args))
            .await
    }
}
