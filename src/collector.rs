//! Collector Layer
//!
//! Pluggable collectors that poll a monitored service and feed one store
//! database each. Every attached plugin runs its own poll loop; cycles go
//! through a [`CollectorPipeline`] that guards against overlap and keeps the
//! request counters.
//!
//! # Architecture
//!
//! - [`Plugin`]: capability set implemented by each collector variant
//! - [`CollectorPipeline`]: poll → parse → transform → persist state machine
//! - [`CounterTracker`]: counter-delta and restart bookkeeping
//! - [`PluginInstance`]: one configured plugin with its poll timer
//! - [`PluginRegistry`]: type name → implementation, alias tables
//!
//! # Example
//!
//! ```rust,no_run
//! use prickle::collector::PluginRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = PluginRegistry::with_builtin();
//! let mysql = registry.resolve("mysql")?;
//! assert_eq!(mysql.aliases().index_of("handler")?, 2);
//! # Ok(())
//! # }
//! ```

mod delta;
mod graph;
mod instance;
pub mod memcached;
pub mod mysql;
pub mod nginx;
mod pipeline;
mod registry;
mod traits;
mod types;

pub use delta::{CounterTracker, DeltaOutcome};
pub use graph::GraphSpec;
pub use instance::{PluginInstance, PluginSnapshot};
pub use pipeline::{CollectorPipeline, CycleOutcome, PipelineState, RequestCounters};
pub use registry::{
    AliasTable, PluginDescriptor, PluginFactory, PluginRegistry, RegistryError, ResolvedPlugin,
};
pub use traits::{CollectorError, DEFAULT_INTERVAL, Plugin};
pub use types::{
    FieldKind, FieldSpec, ParsedRecord, RawSample, STANDARD_ARCHIVES, StoreUpdate, fill_schema,
    parse_value, standard_schema,
};
