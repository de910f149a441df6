use std::cmp::Ordering;
use std::fmt;

use crate::block::Range;

/// Identity of one unit of work: a module over a block range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    pub module: String,
    pub range: Range,
}

impl JobId {
    pub fn new(module: impl Into<String>, range: Range) -> Self {
        Self {
            module: module.into(),
            range,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.range)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Waiting,
    Scheduled,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling order: modules closer to the requested output first, then left to right so
/// partial snapshots chain contiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority {
    pub distance_to_output: u32,
    pub start_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    dependencies: Vec<JobId>,
    pub(crate) priority: Priority,
    pub(crate) state: JobState,
    pub(crate) attempts: u32,
}

impl Job {
    pub fn new(id: JobId, dependencies: Vec<JobId>, priority: Priority) -> Self {
        Self {
            id,
            dependencies,
            priority,
            state: JobState::Waiting,
            attempts: 0,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn module(&self) -> &str {
        &self.id.module
    }

    pub fn range(&self) -> Range {
        self.id.range
    }

    pub fn dependencies(&self) -> &[JobId] {
        &self.dependencies
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Number of times the job was handed to a worker.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Orders by priority, ties broken by identity.
    pub fn schedule_cmp(&self, other: &Job) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}
