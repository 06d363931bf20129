//! Render cadences and their coalesced groups.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::render::RenderError;

/// Period every unscheduled period falls back to.
pub const DEFAULT_PERIOD: &str = "default";

/// Built-in cadences, applied under any configured entries.
pub const DEFAULT_CADENCES: [(&str, u64); 4] = [
    ("hour", 60),
    ("day", 300),
    ("week", 900),
    (DEFAULT_PERIOD, 60),
];

/// Period name → seconds between renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CadenceTable {
    entries: BTreeMap<String, u64>,
}

impl Default for CadenceTable {
    fn default() -> Self {
        DEFAULT_CADENCES
            .iter()
            .map(|(period, secs)| (period.to_string(), *secs))
            .collect()
    }
}

impl FromIterator<(String, u64)> for CadenceTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl CadenceTable {
    /// Table with exactly the given entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        entries
            .into_iter()
            .map(|(period, secs)| (period.into(), secs))
            .collect()
    }

    /// Fill in built-in cadences for periods the table does not mention.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        for (period, secs) in DEFAULT_CADENCES {
            self.entries.entry(period.to_string()).or_insert(secs);
        }
        self
    }

    /// Check the table can schedule anything.
    ///
    /// # Errors
    /// `InvalidCadence` when `default` is missing or any cadence is zero.
    pub fn validate(&self) -> Result<(), RenderError> {
        if !self.entries.contains_key(DEFAULT_PERIOD) {
            return Err(RenderError::InvalidCadence(format!(
                "no '{DEFAULT_PERIOD}' cadence"
            )));
        }
        if let Some((period, _)) = self.entries.iter().find(|(_, secs)| **secs == 0) {
            return Err(RenderError::InvalidCadence(format!(
                "cadence for '{period}' must be positive"
            )));
        }
        Ok(())
    }

    /// Cadence for `period`, if scheduled explicitly.
    pub fn get(&self, period: &str) -> Option<u64> {
        self.entries.get(period).copied()
    }

    /// True when `period` has its own cadence (not through `default`).
    pub fn is_explicit(&self, period: &str) -> bool {
        period != DEFAULT_PERIOD && self.entries.contains_key(period)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periods sharing a cadence, one group per distinct cadence, fastest first.
    pub fn groups(&self) -> Vec<CadenceGroup> {
        let mut by_secs: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (period, secs) in &self.entries {
            by_secs.entry(*secs).or_default().push(period.clone());
        }
        by_secs
            .into_iter()
            .map(|(secs, periods)| CadenceGroup {
                interval: Duration::from_secs(secs),
                periods,
            })
            .collect()
    }
}

/// Periods rendered on one coalesced timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceGroup {
    /// Time between ticks.
    pub interval: Duration,
    /// Periods in this group, sorted by name.
    pub periods: Vec<String>,
}

impl CadenceGroup {
    /// True when this group carries the `default` period.
    pub fn includes_default(&self) -> bool {
        self.contains(DEFAULT_PERIOD)
    }

    /// True when `period` is in this group.
    pub fn contains(&self, period: &str) -> bool {
        self.periods.iter().any(|p| p == period)
    }
}
