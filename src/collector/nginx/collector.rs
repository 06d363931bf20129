//! Nginx stub-status collector.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;

use crate::collector::{
    CollectorError, FieldSpec, GraphSpec, ParsedRecord, Plugin, RawSample, STANDARD_ARCHIVES,
    parse_value,
};
use crate::config::PluginOptions;
use crate::render::RenderContext;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 80;

/// Default status page path.
pub const DEFAULT_STATUS_PATH: &str = "app_status";

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stored fields with their data-source maximum, in schema order.
const STATUS_FIELDS: [(&str, bool, u64); 5] = [
    ("active", false, 60_000),
    ("requests", true, 100_000_000),
    ("reading", false, 60_000),
    ("writing", false, 60_000),
    ("waiting", false, 60_000),
];

fn status_fields() -> Vec<FieldSpec> {
    STATUS_FIELDS
        .iter()
        .map(|(name, counter, _)| {
            if *counter {
                FieldSpec::counter(*name)
            } else {
                FieldSpec::gauge(*name)
            }
        })
        .collect()
}

/// Parse a stub-status page into `active`, `requests`, `reading`, `writing`, `waiting`.
///
/// # Errors
/// `Parse` when the page does not look like stub-status output.
pub fn parse_status(body: &str) -> Result<ParsedRecord, CollectorError> {
    static STATUS_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = STATUS_REGEX.get_or_init(|| {
        Regex::new(
            r"(?s)Active connections:\s+(\d+)\s*\r?\nserver accepts handled requests\r?\n\s+\d+\s+\d+\s+(\d+)\s*\r?\nReading:\s+(\d+).*?Writing:\s+(\d+).*?Waiting:\s+(\d+)",
        )
        .expect("failed to compile nginx status regex")
    });

    let caps = regex
        .captures(body)
        .ok_or_else(|| CollectorError::Parse("unrecognized nginx status page".to_string()))?;

    let mut record = ParsedRecord::new();
    for (index, (name, _, _)) in STATUS_FIELDS.iter().enumerate() {
        let value = parse_value(&caps[index + 1])
            .map_err(|e| CollectorError::Parse(format!("field '{name}': {e}")))?;
        record.insert(*name, value);
    }
    Ok(record)
}

/// Nginx stub-status collector.
#[derive(Debug, Clone, Default)]
pub struct NginxPlugin {
    url: String,
    client: Client,
}

#[async_trait::async_trait]
impl Plugin for NginxPlugin {
    fn init(&mut self, options: &mut PluginOptions) -> Result<(), CollectorError> {
        let host = options
            .host
            .clone()
            .ok_or_else(|| CollectorError::Config("missing 'host'".to_string()))?;
        let port = *options.port.get_or_insert(DEFAULT_PORT);
        let path = options
            .status_path
            .get_or_insert_with(|| DEFAULT_STATUS_PATH.to_string());
        let timeout = *options.timeout.get_or_insert(DEFAULT_TIMEOUT);

        self.url = format!("http://{}:{}/{}", host, port, path.trim_start_matches('/'));
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::Config(format!("http client: {e}")))?;
        Ok(())
    }

    fn fields(&self) -> Vec<FieldSpec> {
        status_fields()
    }

    async fn poll(&self) -> Result<RawSample, CollectorError> {
        let response = self.client.get(&self.url).send().await?;
        let body = response.error_for_status()?.text().await?;
        Ok(RawSample::Text(body))
    }

    fn parse(&self, raw: RawSample) -> Result<ParsedRecord, CollectorError> {
        match raw {
            RawSample::Text(body) => parse_status(&body),
            _ => Err(CollectorError::Parse("expected a status page".to_string())),
        }
    }

    fn schema(&self) -> Vec<String> {
        let fields = status_fields();
        std::iter::once("-s {interval}".to_string())
            .chain(
                fields
                    .iter()
                    .zip(STATUS_FIELDS)
                    .map(|(field, (_, _, max))| field.data_source(Some(max))),
            )
            .chain(STANDARD_ARCHIVES.iter().map(|rra| rra.to_string()))
            .collect()
    }

    fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
        let mut connections = GraphSpec::new("open connections", "requests/sec")
            .def("active", "active")
            .def("reading", "reading")
            .def("writing", "writing")
            .def("waiting", "waiting");
        for (name, label, color) in [
            ("active", "Total", "#22FF22"),
            ("reading", "Reading", "#0022FF"),
            ("writing", "Writing", "#FF0000"),
            ("waiting", "Waiting", "#00AAAA"),
        ] {
            connections = connections
                .line(format!("LINE2:{name}{color}:{label}"))
                .range_summary(name, "%5.1lf %S", "\\n");
        }

        vec![
            GraphSpec::new("requests/second", "requests/sec")
                .def("requests", "requests")
                .line("AREA:requests#336600:Requests")
                .summary("requests", "%5.1lf %S", "req/sec")
                .build(),
            connections.build(),
        ]
    }
}
