//! Memcached collector.
//!
//! - [`MemcachedPlugin`]: connection, hit/miss, memory and traffic stats via `stats`

mod collector;

pub use collector::{DEFAULT_PORT, MemcachedPlugin, read_stats};
