//! Store Layer
//!
//! Thin async bridge to the external time-series tool. Every invocation runs
//! under the shared [`ConcurrencyLimiter`](crate::limiter::ConcurrencyLimiter):
//!
//! - [`StoreAdapter`]: create / update / render entry points used by the core
//! - [`StoreBackend`]: seam for the process that actually does the work
//! - [`RrdTool`]: backend spawning the `rrdtool` binary

mod adapter;
mod backend;
mod error;

pub use adapter::{CreateOutcome, StoreAdapter};
pub use backend::{DEFAULT_RRDTOOL, RrdTool, StoreBackend, StoreCommand};
pub use error::StoreError;
