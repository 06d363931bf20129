//! Per-plugin collection state machine.
//!
//! A cycle walks `Idle → Polling → Parsing → Transforming → Persisting → Idle`.
//! Any stage may fail, which counts the cycle as failed and returns to `Idle`;
//! there is no in-cycle retry, the next tick tries again.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::Instrument;

use crate::collector::{CollectorError, CounterTracker, Plugin};
use crate::store::StoreAdapter;

/// Where a pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
    /// No cycle in flight.
    #[default]
    Idle,
    /// Waiting on the monitored service.
    Polling,
    /// Turning the raw sample into a record.
    Parsing,
    /// Computing the store update.
    Transforming,
    /// Writing the update to the store.
    Persisting,
}

/// Request counters exposed to the view layer.
///
/// `successful_requests + failed_requests <= requests_sent`, with equality
/// whenever no cycle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RequestCounters {
    /// Accepted cycles.
    pub requests_sent: u64,
    /// Cycles that completed every stage.
    pub successful_requests: u64,
    /// Cycles abandoned at some stage.
    pub failed_requests: u64,
}

/// Result of one [`CollectorPipeline::run_cycle`] call.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle was in flight; nothing ran and nothing was counted.
    Rejected,
    /// Every stage completed. `persisted` is false when the update was suppressed.
    Succeeded {
        /// Whether a store update was written.
        persisted: bool,
    },
    /// A stage failed and the cycle was abandoned.
    Failed {
        /// Stage that failed.
        stage: PipelineState,
        /// Underlying error.
        error: CollectorError,
    },
}

impl CycleOutcome {
    /// True when the cycle ran to completion.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[derive(Debug, Default)]
struct CycleState {
    phase: PipelineState,
    counters: RequestCounters,
}

/// Runs collection cycles for one plugin.
pub struct CollectorPipeline {
    id: String,
    plugin: Arc<dyn Plugin>,
    tracker: Mutex<CounterTracker>,
    store_path: PathBuf,
    store: StoreAdapter,
    state: Mutex<CycleState>,
}

impl std::fmt::Debug for CollectorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorPipeline")
            .field("id", &self.id)
            .field("store_path", &self.store_path)
            .field("state", &self.state())
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

impl CollectorPipeline {
    /// Create a pipeline writing to `store_path`.
    pub fn new(
        id: impl Into<String>,
        plugin: Arc<dyn Plugin>,
        store_path: impl Into<PathBuf>,
        store: StoreAdapter,
    ) -> Self {
        let tracker = plugin.counter_tracker();
        Self {
            id: id.into(),
            plugin,
            tracker: Mutex::new(tracker),
            store_path: store_path.into(),
            store,
            state: Mutex::new(CycleState::default()),
        }
    }

    /// Plugin instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The plugin driven by this pipeline.
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Database this pipeline writes to.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Current stage.
    pub fn state(&self) -> PipelineState {
        self.lock_state().phase
    }

    /// True while a cycle is in flight.
    pub fn is_busy(&self) -> bool {
        self.state() != PipelineState::Idle
    }

    /// Snapshot of the request counters.
    pub fn counters(&self) -> RequestCounters {
        self.lock_state().counters
    }

    /// Run one cycle unless another is already in flight.
    ///
    /// Never returns an error: failures are logged, counted and reported in
    /// the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if let Err(phase) = self.try_begin() {
            tracing::warn!(plugin = %self.id, state = %phase, "Previous cycle still in flight, tick dropped");
            return CycleOutcome::Rejected;
        }

        let mut guard = CycleGuard {
            pipeline: self,
            settled: false,
        };
        let start = Instant::now();
        let span = tracing::debug_span!("cycle", plugin = %self.id);
        let result = self.execute().instrument(span).await;
        let duration_ms = start.elapsed().as_millis();
        guard.settled = true;

        match result {
            Ok(persisted) => {
                self.settle(true);
                tracing::debug!(plugin = %self.id, duration_ms, persisted, "Collection succeeded");
                CycleOutcome::Succeeded { persisted }
            }
            Err(error) => {
                let stage = self.settle(false);
                tracing::error!(plugin = %self.id, stage = %stage, duration_ms, error = %error, "Collection failed");
                CycleOutcome::Failed { stage, error }
            }
        }
    }

    async fn execute(&self) -> Result<bool, CollectorError> {
        self.enter(PipelineState::Polling);
        let raw = self.plugin.poll().await?;

        self.enter(PipelineState::Parsing);
        let record = self.plugin.parse(raw)?;

        self.enter(PipelineState::Transforming);
        let update = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            self.plugin.transform(record, &mut tracker)?
        };

        let Some(update) = update else {
            return Ok(false);
        };

        self.enter(PipelineState::Persisting);
        self.store
            .update(&self.store_path, &update.to_string())
            .await?;
        Ok(true)
    }

    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the pipeline, or report the stage of the cycle holding it.
    fn try_begin(&self) -> Result<(), PipelineState> {
        let mut state = self.lock_state();
        if state.phase != PipelineState::Idle {
            return Err(state.phase);
        }
        state.phase = PipelineState::Polling;
        state.counters.requests_sent += 1;
        Ok(())
    }

    fn enter(&self, phase: PipelineState) {
        self.lock_state().phase = phase;
    }

    /// Record the outcome and return to idle. Returns the stage the cycle ended in.
    fn settle(&self, success: bool) -> PipelineState {
        let mut state = self.lock_state();
        let stage = state.phase;
        if success {
            state.counters.successful_requests += 1;
        } else {
            state.counters.failed_requests += 1;
        }
        state.phase = PipelineState::Idle;
        stage
    }
}

/// Counts a cycle as failed if its future is dropped before settling.
struct CycleGuard<'a> {
    pipeline: &'a CollectorPipeline,
    settled: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let stage = self.pipeline.settle(false);
            tracing::warn!(plugin = %self.pipeline.id, stage = %stage, "Cycle cancelled");
        }
    }
}
