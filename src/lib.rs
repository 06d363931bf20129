//! Prickle - Service Statistics Grapher
//!
//! Polls monitored services (memcached, MySQL, nginx) on a fixed interval,
//! turns counters into per-interval deltas, appends them to one round-robin
//! database per plugin and periodically renders graphs from those databases.
//! It can be used as a library, or run as the standalone `prickle` binary.
//!
//! # Architecture
//!
//! - **Collectors**: per-plugin poll loops and the poll → persist pipeline
//! - **Store**: limiter-guarded bridge to the external `rrdtool` process
//! - **Render**: coalesced render timers and the image invalidation map
//! - **Orchestrator**: configuration → running plugins, lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use prickle::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::load("configs/config.yaml")?;
//!     orchestrator.create_databases(false).await?;
//!     orchestrator.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod limiter;
pub mod orchestrator;
pub mod render;
pub mod store;

pub use collector::{
    CollectorError, CollectorPipeline, Plugin, PluginInstance, PluginRegistry, PluginSnapshot,
};
pub use config::{AppConfig, ConfigError, PluginEntry, PluginOptions};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use render::{CadenceTable, RenderInvalidationMap, RenderScheduler};
pub use store::{RrdTool, StoreAdapter, StoreBackend, StoreError};
