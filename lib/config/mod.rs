use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::work::RetryPolicy;

pub const DEFAULT_SAVE_INTERVAL: u64 = 1000;
pub const DEFAULT_SUBREQUEST_SPLIT_SIZE: u64 = 10_000;
pub const DEFAULT_PARALLEL_JOBS: usize = 10;
pub const DEFAULT_INITIAL_JOBS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration read from the environment (and `.env`, loaded by the binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the filesystem object store. Required by the binary.
    pub state_dir: Option<PathBuf>,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RuntimeConfig::default();
        let runtime = RuntimeConfig {
            save_interval: parse_var(&lookup, "BLOCKPIPE_SAVE_INTERVAL", defaults.save_interval)?,
            subrequest_split_size: parse_var(
                &lookup,
                "BLOCKPIPE_SUBREQUEST_SPLIT_SIZE",
                defaults.subrequest_split_size,
            )?,
            parallel_jobs: parse_var(&lookup, "BLOCKPIPE_PARALLEL_JOBS", defaults.parallel_jobs)?,
            initial_jobs: parse_var(&lookup, "BLOCKPIPE_INITIAL_JOBS", defaults.initial_jobs)?,
            rampup_period: Duration::from_secs(parse_var(&lookup, "BLOCKPIPE_RAMPUP_SECONDS", 0)?),
            max_jobs_ahead: parse_var(&lookup, "BLOCKPIPE_MAX_JOBS_AHEAD", defaults.max_jobs_ahead)?,
            ..defaults
        };
        runtime.validate()?;

        Ok(Self {
            state_dir: lookup("BLOCKPIPE_STATE_DIR")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            runtime,
        })
    }

    pub fn require_state_dir(&self) -> Result<&PathBuf, ConfigError> {
        self.state_dir
            .as_ref()
            .ok_or(ConfigError::Missing("BLOCKPIPE_STATE_DIR"))
    }
}

/// Immutable settings for one scheduling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Snapshot granularity in blocks.
    pub save_interval: u64,
    /// Upper bound on a single job's range, in blocks.
    pub subrequest_split_size: u64,
    /// Target worker count.
    pub parallel_jobs: usize,
    /// Workers active before ramp-up starts.
    pub initial_jobs: usize,
    /// Zero starts every worker immediately.
    pub rampup_period: Duration,
    pub rampup_tick: Duration,
    /// Blocks a module may run ahead of its dependents; zero is unbounded.
    pub max_jobs_ahead: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            save_interval: DEFAULT_SAVE_INTERVAL,
            subrequest_split_size: DEFAULT_SUBREQUEST_SPLIT_SIZE,
            parallel_jobs: DEFAULT_PARALLEL_JOBS,
            initial_jobs: DEFAULT_INITIAL_JOBS,
            rampup_period: Duration::ZERO,
            rampup_tick: Duration::from_secs(1),
            max_jobs_ahead: 0,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_interval == 0 {
            return Err(invalid("BLOCKPIPE_SAVE_INTERVAL", "0", "must be > 0"));
        }
        if self.subrequest_split_size < self.save_interval {
            return Err(invalid(
                "BLOCKPIPE_SUBREQUEST_SPLIT_SIZE",
                &self.subrequest_split_size.to_string(),
                &format!("must be >= the save interval ({})", self.save_interval),
            ));
        }
        if self.parallel_jobs == 0 {
            return Err(invalid("BLOCKPIPE_PARALLEL_JOBS", "0", "must be > 0"));
        }
        if self.rampup_tick.is_zero() {
            return Err(invalid("rampup tick", "0", "must be > 0"));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err: T::Err| invalid(name, &raw, &err.to_string())),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
