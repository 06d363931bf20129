//! One configured plugin: its pipeline, poll timer and render applicability.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::collector::{
    AliasTable, CollectorError, CollectorPipeline, PipelineState, Plugin, RequestCounters,
    ResolvedPlugin,
};
use crate::config::PluginEntry;
use crate::render::{CadenceGroup, CadenceTable, RenderContext};
use crate::store::StoreAdapter;

/// Read-only view of an instance for the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSnapshot {
    /// Instance id.
    pub id: String,
    /// Plugin type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Request counters.
    #[serde(flatten)]
    pub counters: RequestCounters,
    /// Current pipeline stage.
    pub state: PipelineState,
    /// A cycle is in flight.
    pub busy: bool,
    /// The poll timer is armed.
    pub running: bool,
    /// Presentation priority.
    pub sort_priority: i32,
    /// Images per period.
    pub num_graphs: usize,
    /// Rendered periods.
    pub periods: Vec<String>,
}

struct PollTimer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A plugin attached to the orchestrator.
pub struct PluginInstance {
    id: String,
    kind: String,
    periods: Vec<String>,
    default_periods: BTreeSet<String>,
    aliases: Arc<AliasTable>,
    interval: Duration,
    wait_till_finish: bool,
    pipeline: Arc<CollectorPipeline>,
    running: AtomicBool,
    timer: Mutex<Option<PollTimer>>,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("periods", &self.periods)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PluginInstance {
    /// Build and initialize a plugin of type `resolved` from its config entry.
    ///
    /// Default-eligible periods (configured periods without a cadence of their
    /// own) are fixed here and never recomputed.
    ///
    /// # Errors
    /// `CollectorError::Config` when the plugin rejects its options.
    pub fn attach(
        mut entry: PluginEntry,
        resolved: &ResolvedPlugin,
        cadences: &CadenceTable,
        context: &RenderContext,
        store: StoreAdapter,
    ) -> Result<Self, CollectorError> {
        let mut plugin = resolved.instantiate();
        plugin
            .init(&mut entry.options)
            .map_err(|e| CollectorError::Config(format!("plugin '{}': {}", entry.id, e)))?;
        let plugin: Arc<dyn Plugin> = Arc::from(plugin);

        let interval = entry.interval.unwrap_or_else(|| plugin.interval());
        let wait_till_finish = entry
            .wait_till_finish
            .unwrap_or_else(|| plugin.wait_till_finish());

        let default_periods = entry
            .periods
            .iter()
            .filter(|period| !cadences.is_explicit(period))
            .cloned()
            .collect();

        let pipeline = Arc::new(CollectorPipeline::new(
            entry.id.clone(),
            plugin,
            context.store_path(&entry.id),
            store,
        ));

        tracing::debug!(
            plugin = %entry.id,
            plugin_type = %entry.kind,
            interval_secs = interval.as_secs(),
            "Plugin attached"
        );

        Ok(Self {
            id: entry.id,
            kind: entry.kind,
            periods: entry.periods,
            default_periods,
            aliases: Arc::clone(resolved.aliases()),
            interval,
            wait_till_finish,
            pipeline,
            running: AtomicBool::new(false),
            timer: Mutex::new(None),
        })
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plugin type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Configured periods.
    pub fn periods(&self) -> &[String] {
        &self.periods
    }

    /// Periods rendered on the `default` cadence.
    pub fn default_periods(&self) -> &BTreeSet<String> {
        &self.default_periods
    }

    /// Graph alias table.
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Images per period.
    pub fn num_graphs(&self) -> usize {
        self.aliases.len()
    }

    /// Effective poll interval; zero means never polled.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Presentation priority.
    pub fn sort_priority(&self) -> i32 {
        self.pipeline.plugin().sort_priority()
    }

    /// Whether the plugin owns a database.
    pub fn uses_database(&self) -> bool {
        self.pipeline.plugin().uses_database()
    }

    /// Database file.
    pub fn store_path(&self) -> &Path {
        self.pipeline.store_path()
    }

    /// The collection pipeline.
    pub fn pipeline(&self) -> &Arc<CollectorPipeline> {
        &self.pipeline
    }

    /// Request counters.
    pub fn counters(&self) -> RequestCounters {
        self.pipeline.counters()
    }

    /// True while the poll timer is armed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Creation directives with the poll interval filled in.
    pub fn schema(&self) -> Vec<String> {
        crate::collector::fill_schema(&self.pipeline.plugin().schema(), self.interval.as_secs())
    }

    /// Render directive groups, one per image.
    pub fn render_specs(&self, context: &RenderContext) -> Vec<Vec<String>> {
        self.pipeline.plugin().render_specs(context)
    }

    /// Periods of `group` this instance renders, in configured order.
    ///
    /// A period applies when it is in the group, or when the group carries
    /// `default` and the period has no cadence of its own.
    pub fn applicable_periods(&self, group: &CadenceGroup) -> Vec<String> {
        let includes_default = group.includes_default();
        self.periods
            .iter()
            .filter(|period| {
                group.contains(period)
                    || (includes_default && self.default_periods.contains(*period))
            })
            .cloned()
            .collect()
    }

    /// View-layer snapshot.
    pub fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            id: self.id.clone(),
            kind: self.kind.clone(),
            counters: self.counters(),
            state: self.pipeline.state(),
            busy: self.pipeline.is_busy(),
            running: self.is_running(),
            sort_priority: self.sort_priority(),
            num_graphs: self.num_graphs(),
            periods: self.periods.clone(),
        }
    }

    /// Arm the poll timer. Returns false if already running.
    ///
    /// The first cycle starts immediately. With a zero interval the instance is
    /// marked running but never polls.
    pub fn run(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(plugin = %self.id, "Plugin already running");
            return false;
        }

        if self.interval.is_zero() {
            tracing::debug!(plugin = %self.id, "Polling disabled");
            return true;
        }

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).poll_loop(rx));
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(PollTimer { shutdown, handle });

        tracing::info!(
            plugin = %self.id,
            interval_secs = self.interval.as_secs(),
            wait_till_finish = self.wait_till_finish,
            "Plugin started"
        );
        true
    }

    /// Disarm the poll timer. An in-flight cycle is left to finish.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            let _ = timer.shutdown.send(true);
            // Detach: the loop exits on its own after any inline cycle.
            drop(timer.handle);
        }
        tracing::info!(plugin = %self.id, "Plugin stopped");
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if self.wait_till_finish {
                self.pipeline.run_cycle().await;
                // The interval restarts from the cycle's end.
                ticker.reset();
            } else {
                let pipeline = Arc::clone(&self.pipeline);
                tokio::spawn(async move {
                    pipeline.run_cycle().await;
                });
            }
        }
        tracing::debug!(plugin = %self.id, "Poll loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FieldSpec, PluginDescriptor, PluginRegistry, RawSample};
    use crate::limiter::ConcurrencyLimiter;
    use crate::store::{StoreBackend, StoreCommand, StoreError};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    static POLLS: AtomicUsize = AtomicUsize::new(0);

    struct Counting {
        slow: bool,
    }

    #[async_trait::async_trait]
    impl Plugin for Counting {
        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }

        fn sort_priority(&self) -> i32 {
            3
        }

        fn fields(&self) -> Vec<FieldSpec> {
            vec![FieldSpec::counter("n")]
        }

        async fn poll(&self) -> Result<RawSample, CollectorError> {
            let n = POLLS.fetch_add(1, Ordering::SeqCst) as i64;
            if self.slow {
                tokio::time::sleep(Duration::from_secs(25)).await;
            }
            Ok(RawSample::Fields(BTreeMap::from([("n".to_string(), n)])))
        }

        fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
            Vec::new()
        }
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl StoreBackend for NullStore {
        async fn invoke(
            &self,
            _command: StoreCommand,
            _path: &Path,
            _args: &[String],
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn instance(entry: PluginEntry, slow: bool) -> Arc<PluginInstance> {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("counting", 2, move || {
                Box::new(Counting { slow })
            }))
            .unwrap();
        let resolved = registry.resolve("counting").unwrap();
        let cadences = CadenceTable::new([("hour", 60), ("day", 300), ("default", 60)]);
        let context = RenderContext::new("/db", "/img");
        let store = StoreAdapter::new(Arc::new(NullStore), ConcurrencyLimiter::new(1).unwrap());
        Arc::new(PluginInstance::attach(entry, &resolved, &cadences, &context, store).unwrap())
    }

    #[test]
    fn test_attach_derives_settings() {
        let entry = PluginEntry::new("c1", "counting").with_periods(["day", "month"]);
        let instance = instance(entry, false);

        assert_eq!(instance.interval(), Duration::from_secs(10));
        assert_eq!(instance.store_path(), Path::new("/db/c1.rrd"));
        assert_eq!(instance.num_graphs(), 2);
        assert_eq!(
            instance.default_periods().iter().collect::<Vec<_>>(),
            vec!["month"]
        );
        assert_eq!(instance.schema()[0], "-s 10");
        assert_eq!(instance.schema()[1], "DS:n:ABSOLUTE:20:0:U");

        let snapshot = instance.snapshot();
        assert_eq!(snapshot.sort_priority, 3);
        assert!(!snapshot.running);
        assert_eq!(snapshot.counters, RequestCounters::default());
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let instance = instance(PluginEntry::new("c1", "counting"), false);
        let json = serde_json::to_value(instance.snapshot()).unwrap();
        assert_eq!(json["type"], "counting");
        assert_eq!(json["requests_sent"], 0);
        assert_eq!(json["state"], "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timer_and_stop() {
        let instance = instance(
            PluginEntry::new("c1", "counting").with_interval(Duration::from_secs(5)),
            false,
        );
        assert!(instance.run());
        assert!(!instance.run());

        // Ticks at 0s, 5s and 10s.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(instance.counters().requests_sent, 3);

        instance.stop();
        instance.stop();
        assert!(!instance.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        let counters = instance.counters();
        assert_eq!(counters.requests_sent, 3);
        assert_eq!(counters.successful_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_rejected() {
        // A 25s poll on a 10s timer: ticks at 10s and 20s hit a busy pipeline.
        let instance = instance(PluginEntry::new("slow", "counting"), true);
        instance.run();

        tokio::time::sleep(Duration::from_millis(24_000)).await;
        let counters = instance.counters();
        assert_eq!(counters.requests_sent, 1);
        assert_eq!(counters.successful_requests, 0);
        assert!(instance.pipeline().is_busy());

        instance.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        // The in-flight cycle still completes after stop.
        let counters = instance.counters();
        assert_eq!(counters.requests_sent, 1);
        assert_eq!(counters.successful_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_polls() {
        let instance = instance(
            PluginEntry::new("idle", "counting").with_interval(Duration::ZERO),
            false,
        );
        assert!(instance.run());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(instance.counters().requests_sent, 0);
        instance.stop();
    }
}
