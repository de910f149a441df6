use std::path::PathBuf;

use crate::build_info;
use crate::config::{Config, ConfigError, RuntimeConfig};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Reconciles cached module snapshots against a target block",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the storage state of every module and the jobs needed to reach the stop block
    Plan(PlanArgs),
    /// Fold contiguous partial store snapshots into complete snapshots
    Squash(SquashArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Plan(_) => "plan",
            Command::Squash(_) => "squash",
        }
    }

    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Plan(args) => &args.common,
            Command::Squash(args) => &args.common,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON module graph definition
    #[arg(long)]
    pub graph: PathBuf,
    /// Exclusive block the modules are brought up to
    #[arg(long = "stop-block")]
    pub stop_block: u64,
    /// Snapshot directory, overrides BLOCKPIPE_STATE_DIR
    #[arg(long = "state-dir")]
    pub state_dir: Option<PathBuf>,
    /// Overrides BLOCKPIPE_SAVE_INTERVAL
    #[arg(long = "save-interval")]
    pub save_interval: Option<u64>,
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
    /// Print the metrics registry in Prometheus text format on exit
    #[arg(long = "dump-metrics", default_value_t = false)]
    pub dump_metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Overrides BLOCKPIPE_SUBREQUEST_SPLIT_SIZE
    #[arg(long = "split-size")]
    pub split_size: Option<u64>,
    /// Overrides BLOCKPIPE_MAX_JOBS_AHEAD
    #[arg(long = "max-jobs-ahead")]
    pub max_jobs_ahead: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SquashArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Applies command-line overrides on top of the environment configuration.
pub fn resolve_runtime(config: &Config, command: &Command) -> Result<RuntimeConfig, ConfigError> {
    let mut runtime = config.runtime.clone();
    if let Some(save_interval) = command.common().save_interval {
        runtime.save_interval = save_interval;
    }
    if let Command::Plan(args) = command {
        if let Some(split_size) = args.split_size {
            runtime.subrequest_split_size = split_size;
        }
        if let Some(max_jobs_ahead) = args.max_jobs_ahead {
            runtime.max_jobs_ahead = max_jobs_ahead;
        }
    }
    runtime.validate()?;
    Ok(runtime)
}

pub fn resolve_state_dir(config: &Config, command: &Command) -> Result<PathBuf, ConfigError> {
    match &command.common().state_dir {
        Some(dir) => Ok(dir.clone()),
        None => config.require_state_dir().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from(["blockpipe", "--version", "--this-flag-does-not-exist"])
            .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from([
            "blockpipe",
            "plan",
            "--graph",
            "graph.json",
            "--stop-block",
            "2000",
            "--save-interval",
            "100",
            "--split-size",
            "400",
            "--state-dir",
            "/tmp/states",
        ])
        .expect("valid arguments");
        let config = Config::from_lookup(|name| match name {
            "BLOCKPIPE_STATE_DIR" => Some("/var/lib/blockpipe".to_string()),
            "BLOCKPIPE_MAX_JOBS_AHEAD" => Some("500".to_string()),
            _ => None,
        })
        .expect("valid env");

        assert_eq!(cli.command.name(), "plan");
        let runtime = resolve_runtime(&config, &cli.command).expect("valid runtime");
        assert_eq!(runtime.save_interval, 100);
        assert_eq!(runtime.subrequest_split_size, 400);
        assert_eq!(runtime.max_jobs_ahead, 500);
        assert_eq!(
            resolve_state_dir(&config, &cli.command).expect("state dir"),
            PathBuf::from("/tmp/states")
        );
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::try_parse_from([
            "blockpipe",
            "squash",
            "--graph",
            "graph.json",
            "--stop-block",
            "10",
            "--save-interval",
            "0",
        ])
        .expect("parses");
        let config = Config::from_lookup(|_| None).expect("defaults");
        assert!(resolve_runtime(&config, &cli.command).is_err());
        assert_eq!(
            resolve_state_dir(&config, &cli.command),
            Err(ConfigError::Missing("BLOCKPIPE_STATE_DIR"))
        );
    }
}
