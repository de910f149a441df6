use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;

/// Registers immutable build metadata as a labeled gauge with value `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "blockpipe",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

/// Scheduler counters and gauges. Cloning shares the underlying metrics.
#[derive(Clone, Debug, Default)]
pub struct SchedulerMetrics {
    /// Jobs handed to a worker, retries included.
    pub jobs_scheduled_total: Counter,
    pub jobs_completed_total: Counter,
    /// Transient failures that put a job back in the waiting set.
    pub jobs_retried_total: Counter,
    pub jobs_failed_total: Counter,
    /// Partial snapshots folded into a complete snapshot.
    pub squashes_total: Counter,
    pub partials_written_total: Counter,
    pub outputs_written_total: Counter,
    /// Jobs ready to run at the last scheduling pass.
    pub ready_jobs: Gauge,
    pub free_workers: Gauge,
    pub running_jobs: Gauge,
}

impl SchedulerMetrics {
    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::default();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "jobs_scheduled",
            "Total number of jobs handed to a worker",
            metrics.jobs_scheduled_total.clone(),
        );
        sub_registry.register(
            "jobs_completed",
            "Total number of jobs completed",
            metrics.jobs_completed_total.clone(),
        );
        sub_registry.register(
            "jobs_retried",
            "Total number of transient job failures that were retried",
            metrics.jobs_retried_total.clone(),
        );
        sub_registry.register(
            "jobs_failed",
            "Total number of jobs that failed for good",
            metrics.jobs_failed_total.clone(),
        );
        sub_registry.register(
            "squashes",
            "Total number of partial snapshots squashed into complete snapshots",
            metrics.squashes_total.clone(),
        );
        sub_registry.register(
            "partials_written",
            "Total number of partial store snapshots written",
            metrics.partials_written_total.clone(),
        );
        sub_registry.register(
            "outputs_written",
            "Total number of map output segments written",
            metrics.outputs_written_total.clone(),
        );
        sub_registry.register(
            "ready_jobs",
            "Jobs ready to run at the last scheduling pass",
            metrics.ready_jobs.clone(),
        );
        sub_registry.register(
            "free_workers",
            "Workers free at the last scheduling pass",
            metrics.free_workers.clone(),
        );
        sub_registry.register(
            "running_jobs",
            "Jobs currently executing",
            metrics.running_jobs.clone(),
        );
        metrics
    }
}
