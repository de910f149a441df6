//! Job planning and execution: the dependency-aware [`Plan`], the ramping [`WorkerPool`]
//! and the [`Scheduler`] driving both.

mod job;
mod plan;
mod retry;
mod scheduler;
mod worker_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use job::{Job, JobId, JobState, Priority};
pub use plan::{Plan, PlanCounts, PlanError};
pub use retry::RetryPolicy;
pub use scheduler::{ProgressEvent, RunSummary, Scheduler, SchedulerError};
pub use worker_pool::{
    ModuleOutput, PoolError, SegmentOutput, WorkError, WorkErrorKind, WorkRequest, Worker,
    WorkerHandle, WorkerPool,
};
