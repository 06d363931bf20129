//! Core plugin trait and error types.

use std::time::Duration;

use thiserror::Error;

use crate::collector::{
    CounterTracker, DeltaOutcome, FieldSpec, ParsedRecord, RawSample, StoreUpdate,
    standard_schema,
};
use crate::config::PluginOptions;
use crate::render::RenderContext;
use crate::store::StoreError;

/// Default poll interval (60 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur during a collection cycle or plugin setup.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("timeout elapsed")]
    Timeout,

    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database client error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The service replied with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A declared field was absent from the sample.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// Failed to write the sample to the store.
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The plugin does not support this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Capability set implemented by every collector variant.
///
/// A plugin is shared by the poll loop and the render scheduler, so every hook
/// takes `&self`; mutable counter state lives in the pipeline's
/// [`CounterTracker`] and is passed to [`Plugin::transform`].
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Time between polls. Zero disables periodic polling.
    fn interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }

    /// Presentation ordering; lower sorts first, ties broken by id.
    fn sort_priority(&self) -> i32 {
        0
    }

    /// Arm the next poll only after the current cycle settles.
    fn wait_till_finish(&self) -> bool {
        false
    }

    /// Whether this plugin owns a database file.
    fn uses_database(&self) -> bool {
        true
    }

    /// Apply per-type defaults to `options` and capture what the plugin needs.
    ///
    /// # Errors
    /// `CollectorError::Config` when a required option is missing or invalid.
    fn init(&mut self, options: &mut PluginOptions) -> Result<(), CollectorError> {
        let _ = options;
        Ok(())
    }

    /// Stored fields in schema order.
    fn fields(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    /// Fresh counter bookkeeping for a new pipeline.
    fn counter_tracker(&self) -> CounterTracker {
        CounterTracker::new(self.fields())
    }

    /// Query the monitored service.
    async fn poll(&self) -> Result<RawSample, CollectorError>;

    /// Turn a raw sample into a record. Numeric samples pass through.
    fn parse(&self, raw: RawSample) -> Result<ParsedRecord, CollectorError> {
        match raw {
            RawSample::Fields(values) => Ok(values.into()),
            RawSample::Text(_) => Err(CollectorError::Parse(
                "no parser for text samples".to_string(),
            )),
            RawSample::Stats(_) => Err(CollectorError::Parse(
                "no parser for stats samples".to_string(),
            )),
        }
    }

    /// Produce the store update for `record`, or `None` to skip persisting.
    fn transform(
        &self,
        record: ParsedRecord,
        tracker: &mut CounterTracker,
    ) -> Result<Option<StoreUpdate>, CollectorError> {
        let outcome = tracker.observe(&record)?;
        match &outcome {
            DeltaOutcome::Baseline => {
                tracing::debug!("Baseline sample cached");
            }
            DeltaOutcome::Reset { field } => {
                tracing::info!(field = %field, "Counter went backwards, possible service restart; sample skipped");
            }
            DeltaOutcome::Update(_) => {}
        }
        Ok(outcome.into_update())
    }

    /// Creation directives; may use `{interval}` and `{2interval}`.
    fn schema(&self) -> Vec<String> {
        standard_schema(&self.fields())
    }

    /// Render directives, one group per image.
    fn render_specs(&self, ctx: &RenderContext) -> Vec<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Passthrough;

    #[async_trait::async_trait]
    impl Plugin for Passthrough {
        fn fields(&self) -> Vec<FieldSpec> {
            vec![FieldSpec::gauge("load"), FieldSpec::counter("jobs")]
        }

        async fn poll(&self) -> Result<RawSample, CollectorError> {
            Ok(RawSample::Fields(BTreeMap::new()))
        }

        fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
            Vec::new()
        }
    }

    #[test]
    fn test_default_parse_passes_fields_through() {
        let values: BTreeMap<String, i64> = [("load".to_string(), 3)].into();
        let record = Passthrough.parse(RawSample::Fields(values)).unwrap();
        assert_eq!(record.get("load"), Some(3));

        let err = Passthrough.parse(RawSample::Text("x".into())).unwrap_err();
        assert!(matches!(err, CollectorError::Parse(_)));
    }

    #[test]
    fn test_default_transform_uses_tracker() {
        let plugin = Passthrough;
        let mut tracker = plugin.counter_tracker();

        let first = ParsedRecord::new().with("load", 1).with("jobs", 10);
        let second = ParsedRecord::new().with("load", 2).with("jobs", 15);

        assert_eq!(plugin.transform(first, &mut tracker).unwrap(), None);
        assert_eq!(
            plugin.transform(second, &mut tracker).unwrap(),
            Some(StoreUpdate::new(vec![2, 5]))
        );
    }

    #[test]
    fn test_default_schema_and_interval() {
        let plugin = Passthrough;
        assert_eq!(plugin.interval(), DEFAULT_INTERVAL);
        assert!(plugin.uses_database());
        assert_eq!(plugin.schema()[1], "DS:load:GAUGE:{2interval}:0:U");
    }
}
