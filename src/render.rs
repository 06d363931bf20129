//! Render Layer
//!
//! Periods that share a draw frequency share one timer. Each tick asks every
//! active plugin which of the tick's periods apply to it, dispatches one job
//! per plugin and records successful renders in the invalidation map read by
//! the view layer.
//!
//! - [`CadenceTable`]: period → seconds between renders
//! - [`RenderScheduler`]: tick planning, dispatch and timers
//! - [`RenderInvalidationMap`]: image name → last render time

mod cadence;
mod invalidation;
mod scheduler;

use thiserror::Error;

pub use cadence::{CadenceGroup, CadenceTable, DEFAULT_CADENCES, DEFAULT_PERIOD};
pub use invalidation::RenderInvalidationMap;
pub use scheduler::{
    DEFAULT_SHUTDOWN_TIMEOUT, RenderContext, RenderJob, RenderScheduler, RenderTimers,
    TickReport, TimerInfo, fill_directives, image_name,
};

/// Render layer errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The cadence table cannot drive the timers.
    #[error("invalid cadence table: {0}")]
    InvalidCadence(String),

    /// Timer backend failure.
    #[error("render scheduler error: {0}")]
    Scheduler(String),
}
