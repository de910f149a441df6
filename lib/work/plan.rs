use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, info};

use super::job::{Job, JobId, JobState, Priority};
use crate::graph::{ModuleGraph, ModuleInput};
use crate::storage::ModuleStorageState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no storage state computed for module {0:?}")]
    MissingStorageState(String),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },
}

/// Per-state job tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub waiting: usize,
    pub scheduled: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

/// Every job needed to bring the requested graph up to its target, plus the bookkeeping
/// that decides which of them may start now.
#[derive(Debug, Clone)]
pub struct Plan {
    jobs: BTreeMap<JobId, Job>,
    /// Module name -> names of planned modules reading it.
    dependents: HashMap<String, Vec<String>>,
    highest_module_running_block: HashMap<String, u64>,
    /// In blocks; zero disables back-pressure.
    max_jobs_ahead: u64,
}

impl Plan {
    /// Emits one job per bucketed missing range of every module, wiring dependency edges to
    /// the upstream jobs each one reads.
    ///
    /// A store input at range `r` needs every upstream job starting before `r`'s end, a map
    /// input only the upstream jobs overlapping `r`. Cached upstream ranges have no job and
    /// therefore no edge.
    pub fn build(
        graph: &ModuleGraph,
        states: &BTreeMap<String, ModuleStorageState>,
        subrequest_split_size: u64,
        max_jobs_ahead: u64,
    ) -> Result<Self, PlanError> {
        let mut ranges_by_module = HashMap::new();
        for module in graph.modules() {
            let state = states
                .get(&module.name)
                .ok_or_else(|| PlanError::MissingStorageState(module.name.clone()))?;
            ranges_by_module.insert(
                module.name.as_str(),
                state.batch_requests(subrequest_split_size),
            );
        }

        let mut jobs = BTreeMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for module in graph.modules() {
            for input in &module.inputs {
                if let Some(upstream) = input.module() {
                    dependents
                        .entry(upstream.to_string())
                        .or_default()
                        .push(module.name.clone());
                }
            }

            let distance_to_output = graph.distance_to_output(&module.name).unwrap_or(u32::MAX);
            let Some(ranges) = ranges_by_module.get(module.name.as_str()) else {
                continue;
            };
            for range in ranges {
                let mut dependencies = Vec::new();
                for input in &module.inputs {
                    let (upstream, store_input) = match input {
                        ModuleInput::Source(_) => continue,
                        ModuleInput::Map(name) => (name, false),
                        ModuleInput::Store(name) => (name, true),
                    };
                    let upstream_ranges = ranges_by_module
                        .get(upstream.as_str())
                        .into_iter()
                        .flat_map(|ranges| ranges.iter());
                    for upstream_range in upstream_ranges {
                        let needed = if store_input {
                            upstream_range.start_block() < range.exclusive_end_block()
                        } else {
                            upstream_range.intersects(range)
                        };
                        if needed {
                            dependencies.push(JobId::new(upstream.clone(), *upstream_range));
                        }
                    }
                }

                let id = JobId::new(module.name.clone(), *range);
                let priority = Priority {
                    distance_to_output,
                    start_block: range.start_block(),
                };
                jobs.insert(id.clone(), Job::new(id, dependencies, priority));
            }
        }

        info!(
            event = "plan_built",
            output_module = graph.output_module(),
            jobs = jobs.len(),
            max_jobs_ahead,
            "planned gap-filling jobs"
        );

        Ok(Self {
            jobs,
            dependents,
            highest_module_running_block: HashMap::new(),
            max_jobs_ahead,
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Furthest block end handed out for `module` so far.
    pub fn highest_module_running_block(&self, module: &str) -> Option<u64> {
        self.highest_module_running_block.get(module).copied()
    }

    /// Waiting jobs whose dependencies are all done and which are not held back by
    /// back-pressure, in scheduling order.
    pub fn ready_jobs(&self) -> Vec<&Job> {
        let mut ready: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.state == JobState::Waiting)
            .filter(|job| self.dependencies_done(job))
            .filter(|job| !self.is_throttled(job))
            .collect();
        ready.sort_by(|a, b| a.schedule_cmp(b));
        ready
    }

    /// Marks the best ready job as scheduled and returns it.
    pub fn next_job(&mut self) -> Option<JobId> {
        let id = self.ready_jobs().first().map(|job| job.id().clone())?;
        let job = self.jobs.get_mut(&id)?;
        job.state = JobState::Scheduled;
        let end = id.range.exclusive_end_block();
        let highest = self
            .highest_module_running_block
            .entry(id.module.clone())
            .or_insert(end);
        *highest = (*highest).max(end);
        debug!(event = "job_scheduled", job = %id, "scheduled job");
        Some(id)
    }

    pub fn mark_running(&mut self, id: &JobId) -> Result<(), PlanError> {
        self.transition(id, &[JobState::Scheduled], JobState::Running)?;
        if let Some(job) = self.jobs.get_mut(id) {
            job.attempts += 1;
        }
        Ok(())
    }

    pub fn mark_done(&mut self, id: &JobId) -> Result<(), PlanError> {
        self.transition(id, &[JobState::Running], JobState::Done)
    }

    pub fn mark_failed(&mut self, id: &JobId) -> Result<(), PlanError> {
        self.transition(id, &[JobState::Scheduled, JobState::Running], JobState::Failed)
    }

    /// Puts an unfinished job back in the waiting set.
    pub fn retry(&mut self, id: &JobId) -> Result<(), PlanError> {
        self.transition(
            id,
            &[JobState::Scheduled, JobState::Running, JobState::Failed],
            JobState::Waiting,
        )
    }

    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|job| job.state == JobState::Done)
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Scheduled => counts.scheduled += 1,
                JobState::Running => counts.running += 1,
                JobState::Done => counts.done += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn transition(
        &mut self,
        id: &JobId,
        allowed_from: &[JobState],
        to: JobState,
    ) -> Result<(), PlanError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| PlanError::UnknownJob(id.clone()))?;
        if !allowed_from.contains(&job.state) {
            return Err(PlanError::InvalidTransition {
                job: id.clone(),
                from: job.state,
                to,
            });
        }
        job.state = to;
        Ok(())
    }

    fn dependencies_done(&self, job: &Job) -> bool {
        job.dependencies().iter().all(|dep| {
            self.jobs
                .get(dep)
                .map_or(true, |dep| dep.state == JobState::Done)
        })
    }

    /// True when `job` would end more than `max_jobs_ahead` blocks past the furthest block
    /// handed out for any module reading its output.
    ///
    /// A dependent with nothing handed out yet sits at the start of its first planned job.
    /// Jobs that a dependent's earliest waiting job depends on are never held back, so every
    /// dependent can always make progress.
    fn is_throttled(&self, job: &Job) -> bool {
        if self.max_jobs_ahead == 0 {
            return false;
        }
        let Some(dependents) = self.dependents.get(job.module()) else {
            return false;
        };

        let unblocks_dependent = dependents.iter().any(|dependent| {
            self.earliest_waiting(dependent)
                .is_some_and(|earliest| earliest.dependencies().contains(job.id()))
        });
        if unblocks_dependent {
            return false;
        }

        dependents.iter().any(|dependent| {
            if self.earliest_waiting(dependent).is_none() {
                return false;
            }
            let Some(position) = self
                .highest_module_running_block(dependent)
                .or_else(|| self.first_start(dependent))
            else {
                return false;
            };
            job.range().exclusive_end_block() > position.saturating_add(self.max_jobs_ahead)
        })
    }

    fn first_start(&self, module: &str) -> Option<u64> {
        self.jobs
            .values()
            .filter(|job| job.module() == module)
            .map(|job| job.range().start_block())
            .min()
    }

    fn earliest_waiting(&self, module: &str) -> Option<&Job> {
        self.jobs
            .values()
            .filter(|job| job.module() == module && job.state == JobState::Waiting)
            .min_by_key(|job| job.range().start_block())
    }
}
