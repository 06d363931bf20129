//! Counter-delta bookkeeping shared by every plugin.
//!
//! Gauges are stored raw; counters are stored as the difference to the previous
//! sample. The first sample only establishes a baseline. A counter that goes
//! backwards means the service restarted: the whole update is dropped and the
//! new sample becomes the baseline, so pre- and post-restart values never mix.

use std::collections::BTreeMap;

use crate::collector::{CollectorError, FieldKind, FieldSpec, ParsedRecord, StoreUpdate};

/// What a sample produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// First sample; cached as the baseline, nothing to store.
    Baseline,
    /// A counter (or the restart marker) decreased; re-baselined, nothing to store.
    Reset {
        /// Field that went backwards.
        field: String,
    },
    /// Values ready to store, in schema order.
    Update(StoreUpdate),
}

impl DeltaOutcome {
    /// The store update, if any.
    pub fn into_update(self) -> Option<StoreUpdate> {
        match self {
            Self::Update(update) => Some(update),
            Self::Baseline | Self::Reset { .. } => None,
        }
    }
}

/// Per-plugin baseline of the last raw sample.
#[derive(Debug, Clone)]
pub struct CounterTracker {
    fields: Vec<FieldSpec>,
    restart_marker: Option<String>,
    previous: Option<BTreeMap<String, i64>>,
}

impl CounterTracker {
    /// Track `fields`, emitted in the given order.
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            restart_marker: None,
            previous: None,
        }
    }

    /// Also treat a decrease of `field` as a restart, even if it is not stored.
    ///
    /// Used for uptime-style values that detect restarts before any counter wraps.
    pub fn with_restart_marker(mut self, field: impl Into<String>) -> Self {
        self.restart_marker = Some(field.into());
        self
    }

    /// Declared fields in emission order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// True once a baseline exists.
    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Drop the baseline; the next sample starts over.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Feed one record and compute what to store.
    ///
    /// # Errors
    /// `MissingField` when the record lacks a declared field or the restart marker.
    /// The baseline is left untouched in that case.
    pub fn observe(&mut self, record: &ParsedRecord) -> Result<DeltaOutcome, CollectorError> {
        let current = self.snapshot(record)?;

        let Some(previous) = self.previous.as_ref() else {
            self.previous = Some(current);
            return Ok(DeltaOutcome::Baseline);
        };

        if let Some(field) = self.find_reset(previous, &current) {
            self.previous = Some(current);
            return Ok(DeltaOutcome::Reset { field });
        }

        let values = self
            .fields
            .iter()
            .map(|field| {
                let now = current[&field.name];
                match field.kind {
                    FieldKind::Gauge => now,
                    FieldKind::Counter => now - previous[&field.name],
                }
            })
            .collect();

        self.previous = Some(current);
        Ok(DeltaOutcome::Update(StoreUpdate::new(values)))
    }

    fn snapshot(&self, record: &ParsedRecord) -> Result<BTreeMap<String, i64>, CollectorError> {
        let mut values = BTreeMap::new();
        for field in &self.fields {
            values.insert(field.name.clone(), record.require(&field.name)?);
        }
        if let Some(marker) = &self.restart_marker {
            values.insert(marker.clone(), record.require(marker)?);
        }
        Ok(values)
    }

    fn find_reset(
        &self,
        previous: &BTreeMap<String, i64>,
        current: &BTreeMap<String, i64>,
    ) -> Option<String> {
        if let Some(marker) = &self.restart_marker
            && current[marker] < previous[marker]
        {
            return Some(marker.clone());
        }

        self.fields
            .iter()
            .filter(|field| field.kind == FieldKind::Counter)
            .find(|field| current[&field.name] < previous[&field.name])
            .map(|field| field.name.clone())
    }
}
