//! `SHOW GLOBAL STATUS` collector.
//!
//! Each poll opens a fresh connection, reads the status table and closes it.
//! Status names are lowercased and cut to 19 characters, the longest data
//! source name the store accepts.

use std::collections::BTreeMap;
use std::time::Duration;

use sqlx::mysql::MySqlConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tokio::time::timeout;

use crate::collector::{
    CollectorError, CounterTracker, DEFAULT_INTERVAL, FieldSpec, GraphSpec, Plugin, RawSample,
    parse_value,
};
use crate::config::PluginOptions;
use crate::render::RenderContext;

/// Default MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Default connection timeout (15 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest stored field name.
const MAX_FIELD_LEN: usize = 19;

/// Monotonic status value; a decrease means the server restarted.
const RESTART_MARKER: &str = "uptime";

/// Stored status fields in schema order, with whether each is a gauge.
pub const STATUS_FIELDS: [(&str, bool); 21] = [
    ("bytes_received", false),
    ("bytes_sent", false),
    ("handler_commit", false),
    ("handler_delete", false),
    ("handler_read_first", false),
    ("handler_read_key", false),
    ("handler_read_next", false),
    ("handler_read_prev", false),
    ("handler_read_rnd", false),
    ("handler_read_rnd_ne", false),
    ("handler_rollback", false),
    ("handler_update", false),
    ("handler_write", false),
    ("key_read_requests", false),
    ("key_reads", false),
    ("open_files", true),
    ("open_tables", true),
    ("qcache_hits", false),
    ("qcache_not_cached", false),
    ("qcache_queries_in_c", true),
    ("questions", false),
];

/// Handler graph series: (color, handler suffix).
const HANDLER_SERIES: [(&str, &str); 9] = [
    ("#FF0000", "commit"),
    ("#CC00FF", "read_first"),
    ("#3200FF", "read_key"),
    ("#0065FF", "read_next"),
    ("#00FF65", "read_rnd"),
    ("#33FF00", "read_rnd_next"),
    ("#CBFF00", "update"),
    ("#FF9800", "write"),
    ("#000000", "rollback"),
];

/// Lowercase a status name and cut it to the stored length.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().chars().take(MAX_FIELD_LEN).collect()
}

fn is_wanted(name: &str) -> bool {
    name == RESTART_MARKER || STATUS_FIELDS.iter().any(|(field, _)| *field == name)
}

/// Keep the stored fields (and `uptime`) out of raw status rows.
///
/// # Errors
/// `Parse` when a kept value is not an integer.
pub fn collect_status<I>(rows: I) -> Result<BTreeMap<String, i64>, CollectorError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut values = BTreeMap::new();
    for (name, value) in rows {
        let name = normalize_name(&name);
        if !is_wanted(&name) {
            continue;
        }
        let parsed = parse_value(&value)
            .map_err(|e| CollectorError::Parse(format!("status '{name}' = '{value}': {e}")))?;
        values.insert(name, parsed);
    }
    Ok(values)
}

/// MySQL collector.
#[derive(Debug, Clone)]
pub struct MysqlPlugin {
    connect: MySqlConnectOptions,
    connect_timeout: Duration,
    timeout: Duration,
}

impl Default for MysqlPlugin {
    fn default() -> Self {
        Self {
            connect: MySqlConnectOptions::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_INTERVAL + Duration::from_secs(10),
        }
    }
}

impl MysqlPlugin {
    async fn fetch_status(&self) -> Result<BTreeMap<String, i64>, CollectorError> {
        let mut conn = timeout(self.connect_timeout, self.connect.connect())
            .await
            .map_err(|_| CollectorError::Timeout)??;

        let rows: Vec<(String, String)> = sqlx::query_as("SHOW GLOBAL STATUS")
            .fetch_all(&mut conn)
            .await?;

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "MySQL connection close failed");
        }
        collect_status(rows)
    }
}

#[async_trait::async_trait]
impl Plugin for MysqlPlugin {
    fn init(&mut self, options: &mut PluginOptions) -> Result<(), CollectorError> {
        let host = options
            .host
            .as_deref()
            .ok_or_else(|| CollectorError::Config("missing 'host'".to_string()))?;
        let user = options
            .user
            .as_deref()
            .ok_or_else(|| CollectorError::Config("missing 'user'".to_string()))?;
        let port = *options.port.get_or_insert(DEFAULT_PORT);

        let mut connect = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(user);
        if let Some(password) = options.password.as_deref() {
            connect = connect.password(password);
        }

        self.connect = connect;
        self.connect_timeout = *options
            .connect_timeout
            .get_or_insert(DEFAULT_CONNECT_TIMEOUT);
        self.timeout = *options
            .timeout
            .get_or_insert(DEFAULT_INTERVAL + Duration::from_secs(10));
        Ok(())
    }

    fn fields(&self) -> Vec<FieldSpec> {
        STATUS_FIELDS
            .iter()
            .map(|(name, gauge)| {
                if *gauge {
                    FieldSpec::gauge(*name)
                } else {
                    FieldSpec::counter(*name)
                }
            })
            .collect()
    }

    fn counter_tracker(&self) -> CounterTracker {
        CounterTracker::new(self.fields()).with_restart_marker(RESTART_MARKER)
    }

    async fn poll(&self) -> Result<RawSample, CollectorError> {
        let values = timeout(self.timeout, self.fetch_status())
            .await
            .map_err(|_| CollectorError::Timeout)??;
        Ok(RawSample::Fields(values))
    }

    fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
        let mut handler = GraphSpec::new("handler stats", "invocations/sec").height(300);
        for (_, key) in HANDLER_SERIES {
            handler = handler.def(key, &normalize_name(&format!("handler_{key}")));
        }
        for (i, (color, key)) in HANDLER_SERIES.iter().enumerate() {
            let stack = if i > 0 { ":STACK" } else { "" };
            handler = handler
                .line(format!("AREA:{key}{color}:{key:<15}{stack}"))
                .summary(key, "%8.1lf %S", "");
        }

        vec![
            GraphSpec::new("queries/second", "queries/sec")
                .def("questions", "questions")
                .line("AREA:questions#BFFF00:Queries")
                .summary("questions", "%7.1lf %S", " queries/sec")
                .build(),
            GraphSpec::new("query cache hit/misses", "requests/sec")
                .def("get_hits", "qcache_hits")
                .def("get_missesp", "qcache_not_cached")
                .line("CDEF:get_misses=get_missesp,-1,*")
                .line("AREA:get_hits#BFFF00:Cache Hits")
                .summary("get_hits", "%7.1lf %S", " hits/sec")
                .line("AREA:get_misses#FF0000:Cache Misses")
                .summary("get_missesp", "%7.1lf %S", " miss/sec")
                .build(),
            handler.build(),
            GraphSpec::new("network io", "bytes/second")
                .def("bytes_received", "bytes_received")
                .def("bytes_sent", "bytes_sent")
                .line("CDEF:inbits=bytes_received,8,*")
                .line("CDEF:outbits=bytes_sent,8,*")
                .line("AREA:bytes_received#FF0000:Traffic In")
                .range_summary("inbits", "%6.1lf %Sbps", "\\r")
                .line("AREA:bytes_sent#00FF00:Traffic Out:STACK")
                .range_summary("outbits", "%6.1lf %Sbps", "\\r")
                .build(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DeltaOutcome, ParsedRecord, StoreUpdate, fill_schema};

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_record(base: i64, uptime: i64) -> ParsedRecord {
        STATUS_FIELDS
            .iter()
            .map(|(name, _)| (name.to_string(), base))
            .chain(std::iter::once((RESTART_MARKER.to_string(), uptime)))
            .collect()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Handler_read_rnd_next"), "handler_read_rnd_ne");
        assert_eq!(normalize_name("Qcache_queries_in_cache"), "qcache_queries_in_c");
        assert_eq!(normalize_name("Questions"), "questions");
    }

    #[test]
    fn test_collect_status_keeps_wanted_fields() {
        let values = collect_status(rows(&[
            ("Questions", "1200"),
            ("Uptime", "3600"),
            ("Handler_read_rnd_next", "77"),
            ("Ssl_cipher", ""),
            ("Innodb_buffer_pool_dump_status", "Dumping of buffer pool not started"),
        ]))
        .unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(values["questions"], 1200);
        assert_eq!(values["uptime"], 3600);
        assert_eq!(values["handler_read_rnd_ne"], 77);
    }

    #[test]
    fn test_collect_status_rejects_non_numeric() {
        let err = collect_status(rows(&[("Open_files", "many")])).unwrap_err();
        assert!(matches!(err, CollectorError::Parse(_)));
    }

    #[test]
    fn test_init_requires_host_and_user() {
        let mut options = PluginOptions::for_host("db1");
        assert!(matches!(
            MysqlPlugin::default().init(&mut options),
            Err(CollectorError::Config(_))
        ));

        options.user = Some("monitor".to_string());
        let mut plugin = MysqlPlugin::default();
        plugin.init(&mut options).unwrap();
        assert_eq!(options.port, Some(DEFAULT_PORT));
        assert_eq!(options.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(plugin.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_schema_gauges() {
        let schema = fill_schema(&MysqlPlugin::default().schema(), 60);
        assert_eq!(schema.len(), 1 + STATUS_FIELDS.len() + 4);
        assert_eq!(schema[1], "DS:bytes_received:ABSOLUTE:120:0:U");
        assert!(schema.contains(&"DS:open_files:GAUGE:120:0:U".to_string()));
        assert!(schema.contains(&"DS:qcache_queries_in_c:GAUGE:120:0:U".to_string()));
    }

    #[test]
    fn test_uptime_drop_skips_sample() {
        let plugin = MysqlPlugin::default();
        let mut tracker = plugin.counter_tracker();

        assert_eq!(tracker.observe(&full_record(100, 50)).unwrap(), DeltaOutcome::Baseline);
        let update = plugin.transform(full_record(110, 110), &mut tracker).unwrap();
        let expected: Vec<i64> = STATUS_FIELDS
            .iter()
            .map(|(_, gauge)| if *gauge { 110 } else { 10 })
            .collect();
        assert_eq!(update, Some(StoreUpdate::new(expected)));

        // Counters still grew, but uptime went back.
        assert_eq!(
            tracker.observe(&full_record(120, 5)).unwrap(),
            DeltaOutcome::Reset {
                field: RESTART_MARKER.to_string()
            }
        );
    }

    #[test]
    fn test_render_specs() {
        let specs = MysqlPlugin::default().render_specs(&RenderContext::new("/db", "/img"));
        assert_eq!(specs.len(), 4);

        let handler = &specs[2];
        assert_eq!(handler[1], "-t {id} handler stats");
        assert_eq!(handler[4], "300");
        assert!(handler.contains(&"DEF:read_rnd_next={filename}:handler_read_rnd_ne:AVERAGE".to_string()));
        assert!(handler.contains(&"AREA:commit#FF0000:commit         ".to_string()));
        assert!(handler.contains(&"AREA:rollback#000000:rollback       :STACK".to_string()));
    }
}
