//! MySQL server status collector.

mod collector;

pub use collector::{DEFAULT_PORT, MysqlPlugin, STATUS_FIELDS, collect_status, normalize_name};
