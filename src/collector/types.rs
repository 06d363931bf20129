//! Data flowing through a collection cycle.
//!
//! - [`RawSample`]: whatever `poll()` brought back
//! - [`ParsedRecord`]: named integer fields extracted from a sample
//! - [`StoreUpdate`]: ordered values ready for the store tool
//! - [`FieldSpec`]: one declared data source and how it is stored

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::collector::CollectorError;

/// Payload returned by a poll. Interpretation belongs to the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSample {
    /// Text body (e.g. an HTTP status page).
    Text(String),
    /// Unparsed `name -> value` pairs (e.g. a stats command reply).
    Stats(BTreeMap<String, String>),
    /// Already numeric fields; the default parser passes these through.
    Fields(BTreeMap<String, i64>),
}

/// Typed record derived from a [`RawSample`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecord {
    values: BTreeMap<String, i64>,
}

impl ParsedRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returning the record for chaining.
    pub fn with(mut self, name: impl Into<String>, value: i64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Set a field.
    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    /// Value of `name`, or a parse error naming the missing field.
    pub fn require(&self, name: &str) -> Result<i64, CollectorError> {
        self.get(name)
            .ok_or_else(|| CollectorError::MissingField(name.to_string()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `name -> text` pairs, keeping only `wanted` fields.
    ///
    /// # Errors
    /// `MissingField` when a wanted field is absent, `Parse` when a value is not an integer.
    pub fn from_stats(
        stats: &BTreeMap<String, String>,
        wanted: &[FieldSpec],
    ) -> Result<Self, CollectorError> {
        let mut record = Self::new();
        for field in wanted {
            let raw = stats
                .get(&field.name)
                .ok_or_else(|| CollectorError::MissingField(field.name.clone()))?;
            let value = parse_value(raw).map_err(|e| {
                CollectorError::Parse(format!("field '{}' value '{}': {}", field.name, raw, e))
            })?;
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }
}

impl From<BTreeMap<String, i64>> for ParsedRecord {
    fn from(values: BTreeMap<String, i64>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, i64)> for ParsedRecord {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Ordered values for one store update, rendered as `N:v1:v2:...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUpdate {
    values: Vec<i64>,
}

impl StoreUpdate {
    /// Wrap values already in schema order.
    pub fn new(values: Vec<i64>) -> Self {
        Self { values }
    }

    /// Values in schema order.
    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

impl fmt::Display for StoreUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("N")?;
        for value in &self.values {
            write!(f, ":{value}")?;
        }
        Ok(())
    }
}

/// How a field is stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Instantaneous value, stored as-is.
    #[strum(serialize = "GAUGE")]
    Gauge,
    /// Monotonic counter, stored as the delta since the previous sample.
    #[strum(serialize = "ABSOLUTE")]
    Counter,
}

/// A declared data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Data source name (at most 19 characters for rrdtool).
    pub name: String,
    /// Storage classification.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Gauge field.
    pub fn gauge(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Gauge,
        }
    }

    /// Counter field.
    pub fn counter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Counter,
        }
    }

    /// `DS:` creation directive; heartbeat is left as the `{2interval}` placeholder.
    pub fn data_source(&self, max: Option<u64>) -> String {
        let max = max.map_or_else(|| "U".to_string(), |m| m.to_string());
        format!("DS:{}:{}:{{2interval}}:0:{}", self.name, self.kind, max)
    }
}

/// Parse an integer sample value.
///
/// Unsigned values past `i64::MAX` (64-bit server counters) saturate.
pub fn parse_value(raw: &str) -> Result<i64, ParseIntError> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(value) => Ok(value),
        Err(err) => match raw.parse::<u64>() {
            Ok(value) => Ok(i64::try_from(value).unwrap_or(i64::MAX)),
            Err(_) => Err(err),
        },
    }
}

/// Round-robin archives shared by every collector database.
///
/// One day at poll resolution, then 30, 120 and 720 sample averages.
pub const STANDARD_ARCHIVES: [&str; 4] = [
    "RRA:AVERAGE:0.5:1:2880",
    "RRA:AVERAGE:0.5:30:672",
    "RRA:AVERAGE:0.5:120:732",
    "RRA:AVERAGE:0.5:720:1460",
];

/// Creation directives for `fields`: step, one `DS:` per field, standard archives.
pub fn standard_schema(fields: &[FieldSpec]) -> Vec<String> {
    std::iter::once("-s {interval}".to_string())
        .chain(fields.iter().map(|field| field.data_source(None)))
        .chain(STANDARD_ARCHIVES.iter().map(|rra| rra.to_string()))
        .collect()
}

/// Substitute `{interval}` / `{2interval}` in creation directives.
pub fn fill_schema(lines: &[String], interval_secs: u64) -> Vec<String> {
    let interval = interval_secs.to_string();
    let heartbeat = (interval_secs * 2).to_string();
    lines
        .iter()
        .map(|line| {
            line.replace("{2interval}", &heartbeat)
                .replace("{interval}", &interval)
        })
        .collect()
}
