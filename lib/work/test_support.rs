use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use super::job::JobId;
use super::worker_pool::{ModuleOutput, SegmentOutput, WorkError, WorkRequest, Worker};
use crate::graph::ModuleKind;

/// Output a healthy executor would produce: map segments carry `module:range`, store
/// segments count their blocks under `"blocks"`.
pub(crate) fn default_outputs(request: &WorkRequest) -> Vec<SegmentOutput> {
    request
        .segments
        .iter()
        .map(|segment| SegmentOutput {
            range: *segment,
            output: match request.kind {
                ModuleKind::Map => {
                    ModuleOutput::Map(format!("{}:{}", request.job.module, segment).into_bytes())
                }
                ModuleKind::Store { .. } => ModuleOutput::Store {
                    kv: BTreeMap::from([(
                        "blocks".to_string(),
                        segment.len().to_string().into_bytes(),
                    )]),
                    deleted_prefixes: Vec::new(),
                },
            },
        })
        .collect()
}

/// Worker answering from a per-job script, falling back to [`default_outputs`] once a
/// job's script is exhausted.
#[derive(Default)]
pub(crate) struct MockWorker {
    plans: Mutex<HashMap<JobId, VecDeque<Result<Vec<SegmentOutput>, WorkError>>>>,
    call_counts: Mutex<HashMap<JobId, u32>>,
    requests: Mutex<Vec<WorkRequest>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockWorker {
    pub(crate) fn with_plan(
        plan: Vec<(JobId, Vec<Result<Vec<SegmentOutput>, WorkError>>)>,
    ) -> Self {
        let mut plans = HashMap::new();
        for (job, entries) in plan {
            plans.insert(job, entries.into_iter().collect());
        }
        Self {
            plans: Mutex::new(plans),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls_for(&self, job: &JobId) -> u32 {
        *self
            .call_counts
            .lock()
            .expect("call_count mutex poisoned")
            .get(job)
            .unwrap_or(&0)
    }

    pub(crate) fn requests(&self) -> Vec<WorkRequest> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Worker for MockWorker {
    fn work<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<Vec<SegmentOutput>, WorkError>> {
        Box::pin(async move {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            {
                let mut counts = self.call_counts.lock().expect("call_count mutex poisoned");
                *counts.entry(request.job.clone()).or_insert(0) += 1;
            }
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push(request.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let scripted = self
                .plans
                .lock()
                .expect("plans mutex poisoned")
                .get_mut(&request.job)
                .and_then(VecDeque::pop_front);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            scripted.unwrap_or_else(|| Ok(default_outputs(&request)))
        })
    }
}
