use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::job::JobId;
use crate::block::Range;
use crate::graph::{ModuleInput, ModuleKind};

/// Everything an executor needs to compute one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub job: JobId,
    pub kind: ModuleKind,
    pub initial_block: u64,
    /// Save-interval windows of the job's range; one output is expected per window.
    pub segments: Vec<Range>,
    pub inputs: Vec<ModuleInput>,
    pub dependencies: Vec<JobId>,
    pub attempt: u32,
}

/// Result of one module over one save-interval window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutput {
    Map(Vec<u8>),
    Store {
        kv: BTreeMap<String, Vec<u8>>,
        deleted_prefixes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutput {
    pub range: Range,
    pub output: ModuleOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkErrorKind {
    /// May succeed on another attempt.
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} work failure: {message}")]
pub struct WorkError {
    pub kind: WorkErrorKind,
    pub message: String,
}

impl WorkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: WorkErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: WorkErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == WorkErrorKind::Transient
    }
}

/// Executes jobs on behalf of the scheduler.
///
/// Implementations wrap the actual module runtime; tests script them.
pub trait Worker: Send + Sync {
    fn work<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<Vec<SegmentOutput>, WorkError>>;
}

impl<T> Worker for Arc<T>
where
    T: Worker + ?Sized,
{
    fn work<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<Vec<SegmentOutput>, WorkError>> {
        (**self).work(request)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no free worker; check worker_available() before borrowing")]
    NoFreeWorker,
    #[error("worker {0} returned while not working")]
    NotWorking(usize),
    #[error("worker {0} does not belong to this pool")]
    UnknownWorker(usize),
}

const UNSET: u8 = 0;
const FREE: u8 = 1;
const WORKING: u8 = 2;

struct WorkerSlot {
    state: AtomicU8,
    worker: Arc<dyn Worker>,
}

/// A borrowed worker. Hand it back with [`WorkerPool::return_worker`].
pub struct WorkerHandle {
    index: usize,
    worker: Arc<dyn Worker>,
}

impl WorkerHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn worker(&self) -> Arc<dyn Worker> {
        Arc::clone(&self.worker)
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("index", &self.index)
            .finish()
    }
}

/// Fixed-capacity set of workers with gradual activation.
///
/// Every slot moves through `Unset -> Free <-> Working` with atomic compare-and-swap only.
/// Ramp-up touches `Unset` slots exclusively and borrow/return never see them, so the
/// ramp-up task runs alongside the scheduler without a lock.
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    target_workers: usize,
    initial_workers: usize,
    rampup_period: Duration,
    started_at: Instant,
    freed: Notify,
}

impl WorkerPool {
    pub fn new<F>(
        initial_workers: usize,
        target_workers: usize,
        rampup_period: Duration,
        mut worker_factory: F,
    ) -> Self
    where
        F: FnMut(usize) -> Arc<dyn Worker>,
    {
        let initial_workers = if initial_workers > target_workers || rampup_period.is_zero() {
            target_workers
        } else {
            initial_workers
        };

        info!(
            event = "worker_pool_initialized",
            target_count = target_workers,
            initial_workers,
            rampup_period_ms = rampup_period.as_millis() as u64,
            "initializing worker pool"
        );

        let slots = (0..target_workers)
            .map(|index| WorkerSlot {
                state: AtomicU8::new(if index < initial_workers { FREE } else { UNSET }),
                worker: worker_factory(index),
            })
            .collect();

        Self {
            slots,
            target_workers,
            initial_workers,
            rampup_period,
            started_at: Instant::now(),
            freed: Notify::new(),
        }
    }

    pub fn target_workers(&self) -> usize {
        self.target_workers
    }

    pub fn worker_available(&self) -> bool {
        self.count(FREE) > 0
    }

    pub fn free_workers(&self) -> usize {
        self.count(FREE)
    }

    /// Workers not yet activated by ramp-up.
    pub fn unset_workers(&self) -> usize {
        self.count(UNSET)
    }

    pub fn borrow(&self) -> Result<WorkerHandle, PoolError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .state
                .compare_exchange(FREE, WORKING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(WorkerHandle {
                    index,
                    worker: Arc::clone(&slot.worker),
                });
            }
        }
        Err(PoolError::NoFreeWorker)
    }

    pub fn return_worker(&self, handle: &WorkerHandle) -> Result<(), PoolError> {
        let slot = self
            .slots
            .get(handle.index)
            .filter(|slot| Arc::ptr_eq(&slot.worker, &handle.worker))
            .ok_or(PoolError::UnknownWorker(handle.index))?;
        slot.state
            .compare_exchange(WORKING, FREE, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PoolError::NotWorking(handle.index))?;
        self.freed.notify_waiters();
        Ok(())
    }

    /// Resolves once at least one worker is free.
    pub async fn wait_for_free_worker(&self) {
        loop {
            let notified = self.freed.notified();
            if self.worker_available() {
                return;
            }
            notified.await;
        }
    }

    /// Activates `Unset` workers so that, `elapsed` into the ramp-up, the share of activated
    /// workers follows a straight line from the initial count to the target. Returns the
    /// number of workers activated by this call.
    pub fn apply_rampup(&self, elapsed: Duration) -> usize {
        let current_target = if self.rampup_period.is_zero() || elapsed >= self.rampup_period {
            self.target_workers
        } else {
            let ratio = elapsed.as_secs_f64() / self.rampup_period.as_secs_f64();
            ((self.target_workers as f64 * ratio) as usize).max(self.initial_workers)
        };

        let mut activated = self.target_workers - self.unset_workers();
        let mut promoted = 0;
        for slot in &self.slots {
            if activated >= current_target {
                break;
            }
            if slot
                .state
                .compare_exchange(UNSET, FREE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                activated += 1;
                promoted += 1;
            }
        }

        if promoted > 0 {
            debug!(
                event = "worker_pool_rampup",
                promoted,
                activated,
                target_count = self.target_workers,
                "activated workers"
            );
            self.freed.notify_waiters();
        }
        promoted
    }

    /// Drives [`WorkerPool::apply_rampup`] every `tick` until all workers are active.
    /// Returns `None` when there is nothing to ramp up.
    pub fn spawn_rampup(pool: Arc<Self>, tick: Duration) -> Option<JoinHandle<()>> {
        if pool.unset_workers() == 0 {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while pool.unset_workers() > 0 {
                interval.tick().await;
                pool.apply_rampup(pool.started_at.elapsed());
            }
        }))
    }

    fn count(&self, state: u8) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.load(Ordering::Acquire) == state)
            .count()
    }
}
