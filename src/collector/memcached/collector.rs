//! Memcached `stats` collector.
//!
//! Speaks the text protocol directly: one `stats` command per poll, reading
//! `STAT <name> <value>` lines until `END`.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::collector::{
    CollectorError, FieldSpec, GraphSpec, ParsedRecord, Plugin, RawSample,
};
use crate::config::PluginOptions;
use crate::render::RenderContext;

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// Default timeout for one `stats` round trip (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stored fields, in schema order.
fn stat_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::gauge("curr_connections"),
        FieldSpec::counter("get_hits"),
        FieldSpec::counter("get_misses"),
        FieldSpec::gauge("bytes"),
        FieldSpec::counter("bytes_read"),
        FieldSpec::counter("bytes_written"),
    ]
}

/// Read a `stats` reply up to its `END` line.
///
/// # Errors
/// `Protocol` on an error reply, an unexpected line or a reply cut short.
pub async fn read_stats<R>(reader: &mut R) -> Result<BTreeMap<String, String>, CollectorError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = BTreeMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(CollectorError::Protocol(
                "connection closed before END".to_string(),
            ));
        }

        let trimmed = line.trim_end();
        if trimmed == "END" {
            return Ok(stats);
        }

        let mut parts = trimmed.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("STAT"), Some(name), Some(value)) => {
                stats.insert(name.to_string(), value.to_string());
            }
            _ => {
                return Err(CollectorError::Protocol(format!(
                    "unexpected reply line '{trimmed}'"
                )));
            }
        }
    }
}

/// Memcached collector.
#[derive(Debug, Clone)]
pub struct MemcachedPlugin {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Default for MemcachedPlugin {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MemcachedPlugin {
    async fn fetch_stats(&self) -> Result<BTreeMap<String, String>, CollectorError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, mut write_half) = stream.into_split();

        write_half.write_all(b"stats\r\n").await?;
        let mut reader = BufReader::new(read_half);
        let stats = read_stats(&mut reader).await?;

        // Best effort; the reply is already complete.
        let _ = write_half.write_all(b"quit\r\n").await;
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl Plugin for MemcachedPlugin {
    fn init(&mut self, options: &mut PluginOptions) -> Result<(), CollectorError> {
        self.host = options
            .host
            .clone()
            .ok_or_else(|| CollectorError::Config("missing 'host'".to_string()))?;
        self.port = *options.port.get_or_insert(DEFAULT_PORT);
        self.timeout = *options.timeout.get_or_insert(DEFAULT_TIMEOUT);
        Ok(())
    }

    fn fields(&self) -> Vec<FieldSpec> {
        stat_fields()
    }

    async fn poll(&self) -> Result<RawSample, CollectorError> {
        let stats = timeout(self.timeout, self.fetch_stats())
            .await
            .map_err(|_| CollectorError::Timeout)??;
        tracing::trace!(host = %self.host, port = self.port, stats = stats.len(), "Memcached stats received");
        Ok(RawSample::Stats(stats))
    }

    fn parse(&self, raw: RawSample) -> Result<ParsedRecord, CollectorError> {
        match raw {
            RawSample::Stats(stats) => ParsedRecord::from_stats(&stats, &stat_fields()),
            _ => Err(CollectorError::Parse(
                "expected a stats reply".to_string(),
            )),
        }
    }

    fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
        vec![
            GraphSpec::new("hit/misses", "requests/sec")
                .def("get_hits", "get_hits")
                .def("get_missesp", "get_misses")
                .line("CDEF:get_misses=get_missesp,-1,*")
                .line("AREA:get_misses#FF0000:Cache Misses")
                .summary("get_missesp", "%7.1lf %S", " miss/sec")
                .line("AREA:get_hits#BFFF00:Cache Hits")
                .summary("get_hits", "%7.1lf %S", " hits/sec")
                .build(),
            GraphSpec::new("memory usage", "bytes")
                .def("bytes", "bytes")
                .line("AREA:bytes#FFAABB:Memory Usage")
                .summary("bytes", "%7.1lf %Sb", "")
                .build(),
            GraphSpec::new("open connections", "open connections")
                .def("curr_connections", "curr_connections")
                .line("LINE2:curr_connections#22FF22:Connections")
                .range_summary("curr_connections", "%5.1lf %S", "\\r")
                .build(),
            GraphSpec::new("network io", "bytes/second")
                .def("bytes_read", "bytes_read")
                .def("bytes_written", "bytes_written")
                .line("CDEF:inbits=bytes_read,8,*")
                .line("CDEF:outbits=bytes_written,8,*")
                .line("AREA:bytes_read#FF0000:Traffic In")
                .range_summary("inbits", "%6.1lf %Sbps", "\\r")
                .line("AREA:bytes_written#00FF00:Traffic Out:STACK")
                .range_summary("outbits", "%6.1lf %Sbps", "\\r")
                .build(),
        ]
    }
}
