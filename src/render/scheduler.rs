//! Coalesced render timers and per-tick job dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::collector::PluginInstance;
use crate::render::{CadenceGroup, CadenceTable, RenderError, RenderInvalidationMap};
use crate::store::StoreAdapter;

/// Default timeout for stopping the render timers (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Extension of every database file.
const DATABASE_EXTENSION: &str = "rrd";

/// File name of image `index` of `id` over `period`; also its invalidation key.
pub fn image_name(id: &str, period: &str, index: usize) -> String {
    format!("{id}-{period}.{index}.png")
}

/// Substitute `{period}`, `{filename}` and `{id}` in render directives.
pub fn fill_directives(lines: &[String], period: &str, filename: &Path, id: &str) -> Vec<String> {
    let filename = filename.display().to_string();
    lines
        .iter()
        .map(|line| {
            line.replace("{period}", period)
                .replace("{filename}", &filename)
                .replace("{id}", id)
        })
        .collect()
}

/// Where databases live and images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    database_path: PathBuf,
    image_path: PathBuf,
}

impl RenderContext {
    /// Context over the given directories.
    pub fn new(database_path: impl Into<PathBuf>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            image_path: image_path.into(),
        }
    }

    /// Directory holding one database per plugin.
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Directory images are written to.
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Database file of plugin `id`.
    pub fn store_path(&self, id: &str) -> PathBuf {
        self.database_path
            .join(format!("{id}.{DATABASE_EXTENSION}"))
    }

    /// Output file for an image name.
    pub fn image_file(&self, name: &str) -> PathBuf {
        self.image_path.join(name)
    }
}

/// One plugin's work for one tick.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Plugin to render.
    pub plugin: Arc<PluginInstance>,
    /// Periods applicable this tick, in configured order.
    pub periods: Vec<String>,
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs dispatched.
    pub jobs: usize,
    /// Images rendered successfully.
    pub rendered: usize,
    /// Images that failed (or jobs that panicked).
    pub failed: usize,
    /// Wall time of the tick.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct JobOutcome {
    rendered: Vec<(String, i64)>,
    failed: usize,
}

/// Dispatches render jobs for all active plugins.
///
/// Cheap to clone; clones share the plugin set, store and invalidation map.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    plugins: Arc<[Arc<PluginInstance>]>,
    cadences: CadenceTable,
    context: Arc<RenderContext>,
    store: StoreAdapter,
    invalidation: RenderInvalidationMap,
}

impl RenderScheduler {
    /// Scheduler over `plugins`, writing render times into `invalidation`.
    pub fn new(
        plugins: Vec<Arc<PluginInstance>>,
        cadences: CadenceTable,
        context: Arc<RenderContext>,
        store: StoreAdapter,
        invalidation: RenderInvalidationMap,
    ) -> Self {
        Self {
            plugins: plugins.into(),
            cadences,
            context,
            store,
            invalidation,
        }
    }

    /// Coalesced timer groups.
    pub fn groups(&self) -> Vec<CadenceGroup> {
        self.cadences.groups()
    }

    /// Shared invalidation map.
    pub fn invalidation(&self) -> &RenderInvalidationMap {
        &self.invalidation
    }

    /// Jobs for one tick of `group`. Plugins with nothing applicable get none.
    pub fn plan_tick(&self, group: &CadenceGroup) -> Vec<RenderJob> {
        self.plugins
            .iter()
            .filter_map(|plugin| {
                let periods = plugin.applicable_periods(group);
                (!periods.is_empty()).then(|| RenderJob {
                    plugin: Arc::clone(plugin),
                    periods,
                })
            })
            .collect()
    }

    /// Run one tick: dispatch every job and wait for all of them to settle.
    ///
    /// A failing job never affects its siblings; render times are recorded
    /// once the whole tick has settled.
    pub async fn run_tick(&self, group: &CadenceGroup) -> TickReport {
        let start = Instant::now();
        let jobs = self.plan_tick(group);
        let job_count = jobs.len();

        let mut tasks = JoinSet::new();
        for job in jobs {
            let scheduler = self.clone();
            tasks.spawn(async move { scheduler.render_job(job).await });
        }

        let mut rendered = Vec::new();
        let mut failed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => {
                    rendered.extend(outcome.rendered);
                    failed += outcome.failed;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Render job aborted");
                    failed += 1;
                }
            }
        }

        let rendered_count = rendered.len();
        self.invalidation.record_all(rendered).await;

        let elapsed = start.elapsed();
        tracing::info!(
            interval_secs = group.interval.as_secs(),
            periods = ?group.periods,
            jobs = job_count,
            rendered = rendered_count,
            failed,
            elapsed_ms = elapsed.as_millis(),
            "Render tick complete"
        );

        TickReport {
            jobs: job_count,
            rendered: rendered_count,
            failed,
            elapsed,
        }
    }

    async fn render_job(&self, job: RenderJob) -> JobOutcome {
        let id = job.plugin.id();
        let specs = job.plugin.render_specs(&self.context);
        let filename = job.plugin.store_path();
        let mut outcome = JobOutcome::default();

        for period in &job.periods {
            for (index, lines) in specs.iter().enumerate() {
                let name = image_name(id, period, index);
                let output = self.context.image_file(&name);
                let directives = fill_directives(lines, period, filename, id);

                match self.store.render(&output, &directives).await {
                    Ok(()) => outcome.rendered.push((name, Utc::now().timestamp())),
                    Err(_) => outcome.failed += 1,
                }
            }
        }
        outcome
    }

    /// Register one repeated timer per cadence group and start them.
    ///
    /// Every group also renders once right away instead of waiting a full
    /// cadence for its first tick.
    ///
    /// # Errors
    /// `Scheduler` if the timer backend cannot be created or started.
    pub async fn start(&self) -> Result<RenderTimers, RenderError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| RenderError::Scheduler(e.to_string()))?;

        let mut timers = Vec::new();
        let mut ticks = Vec::new();
        for group in self.groups() {
            let tick = Arc::new(GuardedTick::new(self.clone(), group.clone()));
            let id = scheduler
                .add(Self::create_job(Arc::clone(&tick))?)
                .await
                .map_err(|e| RenderError::Scheduler(e.to_string()))?;
            tracing::info!(
                job_id = %id,
                interval_secs = group.interval.as_secs(),
                periods = ?group.periods,
                "Render timer registered"
            );
            timers.push(TimerInfo {
                id,
                interval: group.interval,
                periods: group.periods,
            });
            ticks.push(tick);
        }

        scheduler
            .start()
            .await
            .map_err(|e| RenderError::Scheduler(e.to_string()))?;

        for tick in ticks {
            tokio::spawn(async move {
                tick.fire().await;
            });
        }
        tracing::info!(timers = timers.len(), "Render scheduler started");

        Ok(RenderTimers { scheduler, timers })
    }

    fn create_job(tick: Arc<GuardedTick>) -> Result<Job, RenderError> {
        Job::new_repeated_async(tick.group.interval, move |_: Uuid, _: JobScheduler| {
            let tick = Arc::clone(&tick);
            Box::pin(async move {
                tick.fire().await;
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        })
        .map_err(|e| RenderError::Scheduler(e.to_string()))
    }
}

/// One cadence group's tick, skipped while the previous one is still running.
struct GuardedTick {
    scheduler: RenderScheduler,
    group: CadenceGroup,
    busy: AtomicBool,
}

impl GuardedTick {
    fn new(scheduler: RenderScheduler, group: CadenceGroup) -> Self {
        Self {
            scheduler,
            group,
            busy: AtomicBool::new(false),
        }
    }

    /// Run the tick unless one is in flight; `None` when skipped.
    async fn fire(&self) -> Option<TickReport> {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::warn!(periods = ?self.group.periods, "Previous render tick still running, tick skipped");
            return None;
        }
        let report = self.scheduler.run_tick(&self.group).await;
        self.busy.store(false, Ordering::SeqCst);
        Some(report)
    }
}

/// Metadata about a registered render timer.
#[derive(Debug, Clone)]
pub struct TimerInfo {
    /// Job UUID.
    pub id: Uuid,
    /// Tick interval.
    pub interval: Duration,
    /// Periods rendered on each tick.
    pub periods: Vec<String>,
}

/// Running render timers.
pub struct RenderTimers {
    scheduler: JobScheduler,
    timers: Vec<TimerInfo>,
}

impl std::fmt::Debug for RenderTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTimers")
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl RenderTimers {
    /// Registered timers, fastest first.
    pub fn timers(&self) -> &[TimerInfo] {
        &self.timers
    }

    /// Stop all timers with the default timeout.
    pub async fn shutdown(self) -> Result<(), RenderError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop all timers. Ticks already running finish on their own.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), RenderError> {
        match tokio::time::timeout(timeout, self.scheduler.shutdown()).await {
            Ok(Ok(())) => {
                tracing::info!("Render scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(RenderError::Scheduler(e.to_string())),
            Err(_) => {
                tracing::warn!("Render scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{
        CollectorError, FieldSpec, GraphSpec, Plugin, PluginDescriptor, PluginRegistry,
        RawSample,
    };
    use crate::config::PluginEntry;
    use crate::limiter::ConcurrencyLimiter;
    use crate::store::{StoreBackend, StoreCommand, StoreError};
    use std::sync::Mutex;

    struct TwoGraphs;

    #[async_trait::async_trait]
    impl Plugin for TwoGraphs {
        fn fields(&self) -> Vec<FieldSpec> {
            vec![FieldSpec::gauge("load")]
        }

        async fn poll(&self) -> Result<RawSample, CollectorError> {
            Err(CollectorError::Unsupported("poll".to_string()))
        }

        fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
            vec![
                GraphSpec::new("load", "jobs").def("load", "load").build(),
                GraphSpec::new("load again", "jobs").build(),
            ]
        }
    }

    /// Records rendered outputs; fails any output containing `fail_on`.
    #[derive(Default)]
    struct RecordingStore {
        outputs: Mutex<Vec<(String, Vec<String>)>>,
        fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl StoreBackend for RecordingStore {
        async fn invoke(
            &self,
            command: StoreCommand,
            path: &Path,
            args: &[String],
        ) -> Result<(), StoreError> {
            let output = path.display().to_string();
            if let Some(pattern) = &self.fail_on
                && output.contains(pattern.as_str())
            {
                return Err(StoreError::Exit {
                    command: command.as_str(),
                    path: path.to_path_buf(),
                    status: Some(1),
                    stderr: "bad directive".to_string(),
                });
            }
            self.outputs.lock().unwrap().push((output, args.to_vec()));
            Ok(())
        }
    }

    fn scheduler(
        cadences: CadenceTable,
        plugins: &[(&str, &[&str])],
        store: Arc<RecordingStore>,
    ) -> RenderScheduler {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("twographs", 2, || Box::new(TwoGraphs)))
            .unwrap();
        let resolved = registry.resolve("twographs").unwrap();

        let context = Arc::new(RenderContext::new("/var/db", "/var/img"));
        let adapter = StoreAdapter::new(store, ConcurrencyLimiter::new(4).unwrap());

        let instances = plugins
            .iter()
            .map(|(id, periods)| {
                let entry = PluginEntry::new(*id, "twographs").with_periods(periods.iter().copied());
                Arc::new(
                    PluginInstance::attach(entry, &resolved, &cadences, &context, adapter.clone())
                        .unwrap(),
                )
            })
            .collect();

        RenderScheduler::new(
            instances,
            cadences,
            context,
            adapter,
            RenderInvalidationMap::new(),
        )
    }

    #[test]
    fn test_image_name_and_fill() {
        assert_eq!(image_name("web1", "day", 1), "web1-day.1.png");

        let lines = vec![
            "-s -1{period}".to_string(),
            "-t {id} requests".to_string(),
            "DEF:r={filename}:requests:AVERAGE".to_string(),
        ];
        let filled = fill_directives(&lines, "week", Path::new("/db/web1.rrd"), "web1");
        assert_eq!(
            filled,
            vec![
                "-s -1week",
                "-t web1 requests",
                "DEF:r=/db/web1.rrd:requests:AVERAGE"
            ]
        );
    }

    #[test]
    fn test_store_path() {
        let ctx = RenderContext::new("/var/db", "/var/img");
        assert_eq!(ctx.store_path("web1"), PathBuf::from("/var/db/web1.rrd"));
        assert_eq!(
            ctx.image_file("web1-day.0.png"),
            PathBuf::from("/var/img/web1-day.0.png")
        );
    }

    #[test]
    fn test_plugin_without_matching_period_gets_no_job() {
        let cadences = CadenceTable::new([("hour", 60), ("day", 300), ("default", 60)]);
        let scheduler = scheduler(
            cadences,
            &[("p", &["day"])],
            Arc::new(RecordingStore::default()),
        );
        let groups = scheduler.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].periods, vec!["default", "hour"]);

        assert!(scheduler.plan_tick(&groups[0]).is_empty());

        let jobs = scheduler.plan_tick(&groups[1]);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].plugin.id(), "p");
        assert_eq!(jobs[0].periods, vec!["day"]);
    }

    #[test]
    fn test_unscheduled_period_rides_default_timer() {
        let cadences = CadenceTable::new([("hour", 60), ("day", 300), ("default", 120)]);
        let scheduler = scheduler(
            cadences,
            &[("p", &["hour", "month"])],
            Arc::new(RecordingStore::default()),
        );
        let groups = scheduler.groups();
        assert_eq!(groups.len(), 3);

        // 60s: hour only; 120s: default → month; 300s: nothing.
        assert_eq!(scheduler.plan_tick(&groups[0])[0].periods, vec!["hour"]);
        assert_eq!(scheduler.plan_tick(&groups[1])[0].periods, vec!["month"]);
        assert!(scheduler.plan_tick(&groups[2]).is_empty());
    }

    #[tokio::test]
    async fn test_tick_renders_all_and_records_times() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(
            CadenceTable::default(),
            &[("a", &["hour"]), ("b", &["hour", "day"]), ("c", &["week"])],
            Arc::clone(&store),
        );
        let group = scheduler.groups().remove(0);

        let report = scheduler.run_tick(&group).await;
        assert_eq!(report.jobs, 2);
        assert_eq!(report.rendered, 4);
        assert_eq!(report.failed, 0);

        let map = scheduler.invalidation();
        assert!(map.get("a-hour.0.png").await.is_some());
        assert!(map.get("b-hour.1.png").await.is_some());
        assert!(map.get("b-day.0.png").await.is_none());
        assert!(map.get("c-week.0.png").await.is_none());

        let outputs = store.outputs.lock().unwrap();
        let (_, directives) = outputs
            .iter()
            .find(|(out, _)| out == "/var/img/a-hour.0.png")
            .unwrap();
        assert_eq!(directives[0], "-s -1hour");
        assert_eq!(directives[1], "-t a load");
        assert!(directives.contains(&"DEF:load=/var/db/a.rrd:load:AVERAGE".to_string()));
    }

    #[tokio::test]
    async fn test_failed_render_does_not_affect_siblings() {
        let store = Arc::new(RecordingStore {
            fail_on: Some("a-hour.0".to_string()),
            ..Default::default()
        });
        let scheduler = scheduler(
            CadenceTable::default(),
            &[("a", &["hour"]), ("b", &["hour"])],
            Arc::clone(&store),
        );
        let group = scheduler.groups().remove(0);

        let report = scheduler.run_tick(&group).await;
        assert_eq!(report.jobs, 2);
        assert_eq!(report.rendered, 3);
        assert_eq!(report.failed, 1);

        let map = scheduler.invalidation();
        assert!(map.get("a-hour.0.png").await.is_none());
        assert!(map.get("a-hour.1.png").await.is_some());
        assert!(map.get("b-hour.0.png").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_tick_skips_overlap() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(CadenceTable::default(), &[("a", &["hour"])], store);
        let tick = GuardedTick::new(scheduler, CadenceTable::default().groups().remove(0));

        let report = tick.fire().await.unwrap();
        assert_eq!(report.rendered, 2);

        tick.busy.store(true, Ordering::SeqCst);
        assert!(tick.fire().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_renders_immediately() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(
            CadenceTable::default(),
            &[("a", &["hour"]), ("c", &["week"])],
            Arc::clone(&store),
        );
        let timers = scheduler.start().await.unwrap();

        // The fastest cadence is 60s, so anything rendered now came from the initial ticks.
        let map = scheduler.invalidation();
        for _ in 0..100 {
            if map.len().await == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(map.get("a-hour.0.png").await.is_some());
        assert!(map.get("c-week.1.png").await.is_some());
        assert_eq!(store.outputs.lock().unwrap().len(), 4);

        timers.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_registers_one_timer_per_cadence() {
        let scheduler = scheduler(
            CadenceTable::default(),
            &[("a", &["hour"])],
            Arc::new(RecordingStore::default()),
        );
        let timers = scheduler.start().await.unwrap();

        let intervals: Vec<_> = timers.timers().iter().map(|t| t.interval.as_secs()).collect();
        assert_eq!(intervals, vec![60, 300, 900]);

        timers.shutdown().await.unwrap();
    }
}
