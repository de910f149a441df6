use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::JobId;
use super::plan::{Plan, PlanError};
use super::worker_pool::{
    ModuleOutput, PoolError, SegmentOutput, WorkError, WorkRequest, Worker, WorkerHandle,
    WorkerPool,
};
use crate::block::{Range, RangeError, Ranges};
use crate::config::RuntimeConfig;
use crate::graph::{Module, ModuleGraph, ModuleKind};
use crate::metrics::SchedulerMetrics;
use crate::pipeline::{on_stream_terminated, SquashError, Squasher, StreamEnd, Termination, Trailer};
use crate::storage::{
    fetch_map_state, fetch_store_state, FileInfo, FileKind, ModuleStorageState, ObjectStore,
    StorageError,
};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Squash(#[from] SquashError),
    #[error("job {job} failed after {attempts} attempt(s)")]
    JobFailed {
        job: JobId,
        attempts: u32,
        #[source]
        source: WorkError,
    },
    #[error("job {job} returned unusable output: {reason}")]
    UnexpectedOutput { job: JobId, reason: String },
    #[error("module {0:?} is not part of the graph")]
    UnknownModule(String),
    #[error("nothing is running and none of the {waiting} waiting job(s) can start")]
    Stalled { waiting: usize },
    #[error("run cancelled")]
    Cancelled,
    #[error("job task did not finish: {0}")]
    TaskJoin(#[from] JoinError),
}

/// Client-visible progress, delivered best-effort over a `flume` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Ranges already available before any job runs.
    InitialProgress { module: String, ranges: Ranges },
    JobStarted { job: JobId, attempt: u32 },
    JobCompleted { job: JobId },
    JobRetrying {
        job: JobId,
        attempt: u32,
        error: String,
    },
    SnapshotSquashed { module: String, range: Range },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub target_block: u64,
    pub jobs_planned: usize,
    pub jobs_completed: usize,
    pub retries: usize,
    /// Partial store snapshots written by this run, sorted.
    pub partials_written: Ranges,
    pub outputs_written: usize,
    pub termination: Termination,
    pub trailer: Trailer,
}

struct FinishedJob {
    job: JobId,
    handle: WorkerHandle,
    outcome: Result<Vec<SegmentOutput>, WorkError>,
}

struct RunState {
    plan: Plan,
    squasher: Squasher,
    pool: Arc<WorkerPool>,
    tasks: JoinSet<FinishedJob>,
    partials_written: Ranges,
    outputs_written: usize,
    jobs_completed: usize,
    retries: usize,
}

/// Brings every module of a graph up to a target block by filling the gaps in its cached
/// snapshots with jobs run on a [`WorkerPool`].
pub struct Scheduler {
    graph: ModuleGraph,
    object_store: Arc<dyn ObjectStore>,
    config: RuntimeConfig,
    metrics: SchedulerMetrics,
    progress: Option<flume::Sender<ProgressEvent>>,
}

impl Scheduler {
    pub fn new(graph: ModuleGraph, object_store: Arc<dyn ObjectStore>, config: RuntimeConfig) -> Self {
        Self {
            graph,
            object_store,
            config,
            metrics: SchedulerMetrics::default(),
            progress: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SchedulerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Progress events are dropped rather than awaited when a bounded channel is full.
    pub fn with_progress(mut self, sender: flume::Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    /// Computes the storage state of every module in the graph against `target_block`.
    pub async fn reconcile(
        &self,
        target_block: u64,
    ) -> Result<BTreeMap<String, ModuleStorageState>, StorageError> {
        let states = try_join_all(
            self.graph
                .modules()
                .iter()
                .map(|module| self.fetch_state(module, target_block)),
        )
        .await?;

        Ok(states
            .into_iter()
            .map(|state| (state.name().to_string(), state))
            .collect())
    }

    /// Reconciles storage and builds the job plan for `target_block`.
    pub async fn plan(
        &self,
        target_block: u64,
    ) -> Result<(BTreeMap<String, ModuleStorageState>, Plan), SchedulerError> {
        let states = self.reconcile(target_block).await?;
        let plan = Plan::build(
            &self.graph,
            &states,
            self.config.subrequest_split_size,
            self.config.max_jobs_ahead,
        )?;
        Ok((states, plan))
    }

    /// Runs every planned job to completion, squashing store partials as they land.
    ///
    /// Cancelling `cancel` abandons in-flight jobs; nothing they produce is written.
    pub async fn run<F>(
        &self,
        target_block: u64,
        worker_factory: F,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SchedulerError>
    where
        F: FnMut(usize) -> Arc<dyn Worker>,
    {
        let (states, plan) = self.plan(target_block).await?;
        for state in states.values() {
            self.emit(ProgressEvent::InitialProgress {
                module: state.name().to_string(),
                ranges: state.initial_progress_ranges(),
            });
        }

        let mut squasher = Squasher::new(Arc::clone(&self.object_store));
        squasher.register_graph(&self.graph, &states);
        for (module, range) in squasher.squash_all().await? {
            self.record_squash(&module, range);
        }

        let jobs_planned = plan.len();
        let pool = Arc::new(WorkerPool::new(
            self.config.initial_jobs,
            self.config.parallel_jobs,
            self.config.rampup_period,
            worker_factory,
        ));
        let rampup = WorkerPool::spawn_rampup(Arc::clone(&pool), self.config.rampup_tick);

        info!(
            event = "scheduler_run_started",
            output_module = self.graph.output_module(),
            target_block,
            jobs_planned,
            target_workers = pool.target_workers(),
            "starting scheduler run"
        );

        let mut run = RunState {
            plan,
            squasher,
            pool,
            tasks: JoinSet::new(),
            partials_written: Ranges::new(),
            outputs_written: 0,
            jobs_completed: 0,
            retries: 0,
        };
        let outcome = self.execute(&mut run, &cancel).await;

        if let Some(handle) = rampup {
            handle.abort();
        }
        run.tasks.abort_all();

        let StreamEnd {
            termination,
            trailer,
        } = on_stream_terminated(outcome, &mut run.squasher, &run.partials_written).await?;

        let mut partials_written = run.partials_written;
        partials_written.sort();
        info!(
            event = "scheduler_run_complete",
            termination = termination.as_str(),
            jobs_completed = run.jobs_completed,
            retries = run.retries,
            partials_written = partials_written.len(),
            outputs_written = run.outputs_written,
            "scheduler run complete"
        );

        Ok(RunSummary {
            target_block,
            jobs_planned,
            jobs_completed: run.jobs_completed,
            retries: run.retries,
            partials_written,
            outputs_written: run.outputs_written,
            termination,
            trailer,
        })
    }

    async fn fetch_state(
        &self,
        module: &Module,
        target_block: u64,
    ) -> Result<ModuleStorageState, StorageError> {
        let object_store = self.object_store.as_ref();
        let state = if module.is_store() {
            ModuleStorageState::Store(
                fetch_store_state(
                    object_store,
                    &module.name,
                    self.config.save_interval,
                    module.initial_block,
                    target_block,
                )
                .await?,
            )
        } else {
            ModuleStorageState::Map(
                fetch_map_state(
                    object_store,
                    &module.name,
                    self.config.save_interval,
                    module.initial_block,
                    target_block,
                )
                .await?,
            )
        };
        debug!(
            event = "module_reconciled",
            module = %module.name,
            ready_up_to_block = state.ready_up_to_block(),
            missing = %state.missing(),
            "reconciled module storage"
        );
        Ok(state)
    }

    async fn execute(
        &self,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Termination, SchedulerError> {
        if run.plan.is_empty() {
            info!(event = "scheduler_nothing_to_do", "every module is already cached");
            return Ok(Termination::EndOfInput);
        }

        let mut fatal: Option<SchedulerError> = None;
        loop {
            if fatal.is_none() && !cancel.is_cancelled() {
                self.dispatch_ready(run)?;
            }
            self.record_gauges(run);

            let awaiting_rampup =
                fatal.is_none() && !run.pool.worker_available() && run.pool.unset_workers() > 0;
            if run.tasks.is_empty() {
                if let Some(err) = fatal.take() {
                    return Err(err);
                }
                if run.plan.is_complete() {
                    return Ok(Termination::StopBlockReached);
                }
                if !awaiting_rampup && !cancel.is_cancelled() {
                    let waiting = run.plan.counts().waiting;
                    error!(event = "scheduler_stalled", waiting, "no job can make progress");
                    return Err(SchedulerError::Stalled { waiting });
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        event = "scheduler_cancelled",
                        in_flight = run.tasks.len(),
                        "run cancelled, abandoning in-flight jobs"
                    );
                    return Err(SchedulerError::Cancelled);
                }
                joined = run.tasks.join_next(), if !run.tasks.is_empty() => {
                    let Some(joined) = joined else {
                        continue;
                    };
                    let finished = joined?;
                    if cancel.is_cancelled() {
                        return Err(SchedulerError::Cancelled);
                    }
                    if let Err(err) = self.handle_finished(run, finished).await {
                        match &fatal {
                            None => fatal = Some(err),
                            Some(first) => warn!(
                                event = "scheduler_additional_failure",
                                first_error = %first,
                                error = %err,
                                "another job failed while draining"
                            ),
                        }
                    }
                }
                _ = run.pool.wait_for_free_worker(), if awaiting_rampup => {}
            }
        }
    }

    fn dispatch_ready(&self, run: &mut RunState) -> Result<(), SchedulerError> {
        while run.pool.worker_available() {
            let Some(id) = run.plan.next_job() else {
                break;
            };
            let module = self
                .graph
                .module(&id.module)
                .ok_or_else(|| SchedulerError::UnknownModule(id.module.clone()))?;
            let handle = run.pool.borrow()?;
            run.plan.mark_running(&id)?;
            let (attempt, dependencies) = run
                .plan
                .job(&id)
                .map(|job| (job.attempts(), job.dependencies().to_vec()))
                .ok_or_else(|| PlanError::UnknownJob(id.clone()))?;

            let request = WorkRequest {
                job: id.clone(),
                kind: module.kind.clone(),
                initial_block: module.initial_block,
                segments: id.range.split(self.config.save_interval)?,
                inputs: module.inputs.clone(),
                dependencies,
                attempt,
            };
            let delay = if attempt > 1 {
                self.config.retry_policy.backoff_delay(&id, attempt - 1)
            } else {
                Duration::ZERO
            };

            debug!(
                event = "job_dispatched",
                job = %id,
                attempt,
                worker = handle.index(),
                delay_ms = delay.as_millis() as u64,
                "dispatched job"
            );
            self.metrics.jobs_scheduled_total.inc();
            self.emit(ProgressEvent::JobStarted {
                job: id.clone(),
                attempt,
            });

            run.tasks.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let worker = handle.worker();
                let outcome = worker.work(request).await;
                FinishedJob {
                    job: id,
                    handle,
                    outcome,
                }
            });
        }
        Ok(())
    }

    async fn handle_finished(
        &self,
        run: &mut RunState,
        finished: FinishedJob,
    ) -> Result<(), SchedulerError> {
        let FinishedJob {
            job,
            handle,
            outcome,
        } = finished;
        run.pool.return_worker(&handle)?;
        let attempts = run.plan.job(&job).map_or(0, |planned| planned.attempts());

        match outcome {
            Ok(segments) => {
                if let Err(err) = self.persist(run, &job, segments).await {
                    run.plan.mark_failed(&job)?;
                    self.metrics.jobs_failed_total.inc();
                    error!(event = "job_output_rejected", job = %job, error = %err, "could not record job output");
                    return Err(err);
                }
                run.plan.mark_done(&job)?;
                run.jobs_completed += 1;
                self.metrics.jobs_completed_total.inc();
                info!(event = "job_completed", job = %job, attempts, "job completed");
                self.emit(ProgressEvent::JobCompleted { job });
                Ok(())
            }
            Err(err) if err.is_retryable() && self.config.retry_policy.allows_retry(attempts) => {
                warn!(
                    event = "job_retrying",
                    job = %job,
                    attempt = attempts,
                    error = %err,
                    "transient job failure, retrying"
                );
                run.plan.retry(&job)?;
                run.retries += 1;
                self.metrics.jobs_retried_total.inc();
                self.emit(ProgressEvent::JobRetrying {
                    job,
                    attempt: attempts,
                    error: err.message,
                });
                Ok(())
            }
            Err(err) => {
                error!(
                    event = "job_failed",
                    job = %job,
                    attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "job failed"
                );
                run.plan.mark_failed(&job)?;
                self.metrics.jobs_failed_total.inc();
                Err(SchedulerError::JobFailed {
                    job,
                    attempts,
                    source: err,
                })
            }
        }
    }

    /// Writes one job's segments: map output files, or partial snapshots handed on to the
    /// squasher. Segments must be exactly the save-interval windows of the job's range.
    async fn persist(
        &self,
        run: &mut RunState,
        job: &JobId,
        segments: Vec<SegmentOutput>,
    ) -> Result<(), SchedulerError> {
        let module = self
            .graph
            .module(&job.module)
            .ok_or_else(|| SchedulerError::UnknownModule(job.module.clone()))?;

        let expected: Ranges = job.range.split(self.config.save_interval)?.into_iter().collect();
        let returned: Ranges = segments.iter().map(|segment| segment.range).collect();
        if returned != expected {
            return Err(SchedulerError::UnexpectedOutput {
                job: job.clone(),
                reason: format!("expected segments [{expected}], got [{returned}]"),
            });
        }

        for segment in segments {
            match (&module.kind, segment.output) {
                (ModuleKind::Map, ModuleOutput::Map(bytes)) => {
                    let path = FileInfo::new(segment.range, FileKind::Output).path(&module.name);
                    self.object_store.put(&path, bytes).await?;
                    run.outputs_written += 1;
                    self.metrics.outputs_written_total.inc();
                }
                (
                    ModuleKind::Store {
                        value_type,
                        update_policy,
                    },
                    ModuleOutput::Store {
                        kv,
                        deleted_prefixes,
                    },
                ) => {
                    let partial = Store::from_mutations(
                        module.name.clone(),
                        value_type.clone(),
                        *update_policy,
                        kv,
                        deleted_prefixes,
                    );
                    let bytes = partial.to_bytes().map_err(StorageError::from)?;
                    let path = FileInfo::new(segment.range, FileKind::Partial).path(&module.name);
                    self.object_store.put(&path, bytes).await?;
                    run.partials_written.push(segment.range);
                    self.metrics.partials_written_total.inc();

                    for squashed in run.squasher.add_partial(&module.name, segment.range).await? {
                        self.record_squash(&module.name, squashed);
                    }
                }
                (kind, _) => {
                    let expected_kind = match kind {
                        ModuleKind::Map => "map",
                        ModuleKind::Store { .. } => "store",
                    };
                    return Err(SchedulerError::UnexpectedOutput {
                        job: job.clone(),
                        reason: format!(
                            "segment {} does not hold {expected_kind} output",
                            segment.range
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn record_squash(&self, module: &str, range: Range) {
        self.metrics.squashes_total.inc();
        self.emit(ProgressEvent::SnapshotSquashed {
            module: module.to_string(),
            range,
        });
    }

    fn record_gauges(&self, run: &RunState) {
        self.metrics
            .ready_jobs
            .set(run.plan.ready_jobs().len() as i64);
        self.metrics.free_workers.set(run.pool.free_workers() as i64);
        self.metrics.running_jobs.set(run.tasks.len() as i64);
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.progress {
            if let Err(err) = sender.try_send(event) {
                debug!(event = "progress_dropped", reason = %err, "progress event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::linear_graph;
    use crate::storage::MemoryObjectStore;
    use crate::work::test_support::MockWorker;
    use crate::work::RetryPolicy;

    fn runtime_config() -> RuntimeConfig {
        RuntimeConfig {
            save_interval: 10,
            subrequest_split_size: 10,
            parallel_jobs: 2,
            initial_jobs: 2,
            rampup_period: Duration::ZERO,
            rampup_tick: Duration::from_millis(10),
            max_jobs_ahead: 0,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::none()
            },
        }
    }

    fn id(module: &str, range: &str) -> JobId {
        JobId::new(module, range.parse().expect("fixture range"))
    }

    fn shared(worker: &Arc<MockWorker>) -> impl FnMut(usize) -> Arc<dyn Worker> + '_ {
        move |_| Arc::clone(worker) as Arc<dyn Worker>
    }

    async fn read_store(object_store: &MemoryObjectStore, module: &str, range: &str) -> Store {
        let path = FileInfo::new(range.parse().expect("range"), FileKind::Complete).path(module);
        let bytes = object_store.get(&path).await.expect("complete snapshot written");
        Store::from_bytes(module, &bytes).expect("decode snapshot")
    }

    #[tokio::test]
    async fn fills_every_gap_and_squashes_store_partials() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let scheduler = Scheduler::new(linear_graph(0), object_store.clone(), runtime_config());
        let worker = Arc::new(MockWorker::default());

        let summary = scheduler
            .run(30, shared(&worker), CancellationToken::new())
            .await
            .expect("run succeeds");

        assert_eq!(summary.termination, Termination::StopBlockReached);
        assert_eq!(summary.jobs_planned, 9);
        assert_eq!(summary.jobs_completed, 9);
        assert_eq!(summary.outputs_written, 6);
        assert_eq!(summary.trailer.to_string(), "partials-written: 0-10,10-20,20-30");

        let complete = read_store(&object_store, "store_balances", "0-30").await;
        assert_eq!(complete.get("blocks"), Some(b"30".as_slice()));

        // A dependent map job runs only after the store partials it reads were squashed.
        let requests = worker.requests();
        let output_job = requests
            .iter()
            .find(|request| request.job == id("map_output", "20-30"))
            .expect("map_output@20-30 ran");
        assert!(output_job
            .dependencies
            .contains(&id("store_balances", "10-20")));
        assert_eq!(output_job.segments, vec!["20-30".parse().expect("range")]);
    }

    #[tokio::test]
    async fn second_run_over_complete_storage_does_nothing() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let scheduler = Scheduler::new(linear_graph(0), object_store.clone(), runtime_config());
        let worker = Arc::new(MockWorker::default());
        scheduler
            .run(30, shared(&worker), CancellationToken::new())
            .await
            .expect("first run");
        let calls = worker.requests().len();

        let summary = scheduler
            .run(30, shared(&worker), CancellationToken::new())
            .await
            .expect("second run");
        assert_eq!(summary.termination, Termination::EndOfInput);
        assert_eq!(summary.jobs_planned, 0);
        assert_eq!(summary.trailer.value, "");
        assert_eq!(worker.requests().len(), calls);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let metrics = SchedulerMetrics::default();
        let scheduler = Scheduler::new(linear_graph(0), object_store, runtime_config())
            .with_metrics(metrics.clone());
        let flaky = id("store_balances", "0-10");
        let worker = Arc::new(MockWorker::with_plan(vec![(
            flaky.clone(),
            vec![
                Err(WorkError::transient("tier2 unavailable")),
                Err(WorkError::transient("tier2 unavailable")),
            ],
        )]));

        let summary = scheduler
            .run(20, shared(&worker), CancellationToken::new())
            .await
            .expect("run succeeds after retries");

        assert_eq!(worker.calls_for(&flaky), 3);
        assert_eq!(summary.retries, 2);
        assert_eq!(metrics.jobs_retried_total.get(), 2);
        assert_eq!(metrics.jobs_completed_total.get(), summary.jobs_planned as u64);
        let last_attempt = worker
            .requests()
            .into_iter()
            .filter(|request| request.job == flaky)
            .map(|request| request.attempt)
            .max();
        assert_eq!(last_attempt, Some(3));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let mut config = runtime_config();
        config.retry_policy.max_attempts = 2;
        let scheduler = Scheduler::new(linear_graph(0), object_store.clone(), config);
        let failing = id("map_transfers", "10-20");
        let worker = Arc::new(MockWorker::with_plan(vec![(
            failing.clone(),
            vec![
                Err(WorkError::transient("timeout")),
                Err(WorkError::transient("timeout")),
            ],
        )]));

        let err = scheduler
            .run(20, shared(&worker), CancellationToken::new())
            .await
            .expect_err("run fails");
        match err {
            SchedulerError::JobFailed { job, attempts, .. } => {
                assert_eq!(job, failing);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!object_store
            .keys()
            .contains(&FileInfo::new("10-20".parse().expect("range"), FileKind::Output).path("map_transfers")));
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let scheduler = Scheduler::new(linear_graph(0), object_store, runtime_config());
        let broken = id("map_transfers", "0-10");
        let worker = Arc::new(MockWorker::with_plan(vec![(
            broken.clone(),
            vec![Err(WorkError::fatal("wasm trap"))],
        )]));

        let err = scheduler
            .run(10, shared(&worker), CancellationToken::new())
            .await
            .expect_err("run fails");
        assert!(matches!(err, SchedulerError::JobFailed { attempts: 1, .. }));
        assert_eq!(worker.calls_for(&broken), 1);
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_jobs() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let scheduler = Scheduler::new(linear_graph(0), object_store.clone(), runtime_config());
        let worker = Arc::new(MockWorker::default().with_delay(Duration::from_secs(5)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = scheduler
            .run(30, shared(&worker), cancel)
            .await
            .expect_err("run is cancelled");
        assert!(matches!(err, SchedulerError::Cancelled));
        assert!(!worker.requests().is_empty());
        assert!(object_store.keys().is_empty());
    }

    #[tokio::test]
    async fn mismatched_segments_are_rejected() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let scheduler = Scheduler::new(linear_graph(0), object_store, runtime_config());
        let job = id("map_transfers", "0-10");
        let worker = Arc::new(MockWorker::with_plan(vec![(
            job.clone(),
            vec![Ok(vec![SegmentOutput {
                range: "0-5".parse().expect("range"),
                output: ModuleOutput::Map(Vec::new()),
            }])],
        )]));

        let err = scheduler
            .run(10, shared(&worker), CancellationToken::new())
            .await
            .expect_err("bad output");
        assert!(matches!(err, SchedulerError::UnexpectedOutput { job: failed, .. } if failed == job));
    }

    #[tokio::test]
    async fn progress_reports_cached_ranges_and_job_lifecycle() {
        let object_store = Arc::new(MemoryObjectStore::new());
        object_store
            .put(
                &FileInfo::new("0-10".parse().expect("range"), FileKind::Output).path("map_transfers"),
                b"cached".to_vec(),
            )
            .await
            .expect("seed output");

        let (sender, receiver) = flume::unbounded();
        let scheduler = Scheduler::new(linear_graph(0), object_store, runtime_config())
            .with_progress(sender);
        let worker = Arc::new(MockWorker::default());
        let summary = scheduler
            .run(20, shared(&worker), CancellationToken::new())
            .await
            .expect("run succeeds");

        let events: Vec<ProgressEvent> = receiver.drain().collect();
        assert!(events.contains(&ProgressEvent::InitialProgress {
            module: "map_transfers".to_string(),
            ranges: "0-10".parse().expect("ranges"),
        }));
        let completed = events
            .iter()
            .filter(|event| matches!(event, ProgressEvent::JobCompleted { .. }))
            .count();
        assert_eq!(completed, summary.jobs_completed);
        assert_eq!(summary.jobs_planned, 5);
        assert_eq!(worker.calls_for(&id("map_transfers", "0-10")), 0);
        assert!(events.contains(&ProgressEvent::SnapshotSquashed {
            module: "store_balances".to_string(),
            range: "10-20".parse().expect("range"),
        }));
    }

    #[tokio::test]
    async fn rampup_never_exceeds_target_workers() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let mut config = runtime_config();
        config.parallel_jobs = 3;
        config.initial_jobs = 1;
        config.rampup_period = Duration::from_millis(50);
        let scheduler = Scheduler::new(linear_graph(0), object_store, config);
        let worker = Arc::new(MockWorker::default().with_delay(Duration::from_millis(5)));

        let summary = scheduler
            .run(60, shared(&worker), CancellationToken::new())
            .await
            .expect("run succeeds");
        assert_eq!(summary.jobs_completed, summary.jobs_planned);
        assert!(worker.max_in_flight() <= 3);
    }
}
