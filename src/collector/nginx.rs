//! Nginx collectors.
//!
//! - [`NginxPlugin`]: stub-status page poller
//! - [`NginxCombinedPlugin`]: stacked request graph over several [`NginxPlugin`] instances

mod collector;
mod combined;

pub use collector::{DEFAULT_PORT, DEFAULT_STATUS_PATH, NginxPlugin, parse_status};
pub use combined::NginxCombinedPlugin;
