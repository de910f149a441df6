use crate::{
    cli::{resolve_runtime, resolve_state_dir, Cli, Command},
    config::{Config, ConfigError, RuntimeConfig},
    graph::{GraphError, ModuleGraph},
    logging::{format_error_report, init_logging},
    metrics::{register_build_info_metric, SchedulerMetrics},
    pipeline::{SquashError, Squasher},
    storage::{FsObjectStore, ObjectStore, StorageError},
    work::{Scheduler, SchedulerError},
};
use dotenv::dotenv;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

const METRICS_PREFIX: &str = "blockpipe";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot read graph {path}: {source}")]
    GraphRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Squash(#[from] SquashError),
    #[error("cannot encode metrics: {0}")]
    Metrics(#[from] std::fmt::Error),
}

impl CommandError {
    /// Exit code: 2 for bad invocation, 1 for runtime failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Runs one subcommand and returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    dotenv().ok();

    let command = cli.command;
    let logging_context = init_logging("blockpipe", command.name(), &command.common().log_level);
    let run_span = tracing::info_span!(
        "blockpipe_run",
        service = %logging_context.service,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id,
        build_version = %logging_context.build_version,
        build_commit = %logging_context.build_commit
    );
    let _run_guard = run_span.enter();

    match execute(&command).await {
        Ok(()) => {
            info!(event = "command_complete", command = command.name(), "command completed");
            0
        }
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "command_failed",
                command = command.name(),
                error = %err,
                error_report = %error_report,
                "command failed"
            );
            eprintln!("{error_report}");
            err.exit_code()
        }
    }
}

async fn execute(command: &Command) -> Result<(), CommandError> {
    let config = Config::from_env()?;
    let runtime = resolve_runtime(&config, command)?;
    let state_dir = resolve_state_dir(&config, command)?;
    let common = command.common();
    let graph = load_graph(&common.graph).await?;

    let mut registry = Registry::default();
    register_build_info_metric(&mut registry, METRICS_PREFIX);
    let metrics = SchedulerMetrics::register(&mut registry, METRICS_PREFIX);

    info!(
        event = "command_starting",
        command = command.name(),
        output_module = graph.output_module(),
        stop_block = common.stop_block,
        state_dir = %state_dir.display(),
        save_interval = runtime.save_interval,
        "starting command"
    );

    let object_store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(state_dir));
    match command {
        Command::Plan(_) => {
            print_plan(graph, object_store, runtime, metrics, common.stop_block).await?
        }
        Command::Squash(_) => squash(graph, object_store, runtime, metrics, common.stop_block).await?,
    }

    if common.dump_metrics {
        let mut encoded = String::new();
        encode(&mut encoded, &registry)?;
        print!("{encoded}");
    }
    Ok(())
}

async fn load_graph(path: &Path) -> Result<ModuleGraph, CommandError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CommandError::GraphRead {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(ModuleGraph::from_json_slice(&bytes)?)
}

async fn print_plan(
    graph: ModuleGraph,
    object_store: Arc<dyn ObjectStore>,
    runtime: RuntimeConfig,
    metrics: SchedulerMetrics,
    stop_block: u64,
) -> Result<(), CommandError> {
    let scheduler = Scheduler::new(graph, object_store, runtime).with_metrics(metrics.clone());
    let (states, plan) = scheduler.plan(stop_block).await?;

    for module in scheduler.graph().modules() {
        let Some(state) = states.get(&module.name) else {
            continue;
        };
        println!(
            "module {} ready_up_to={} cached=[{}] missing=[{}]",
            module.name,
            state.ready_up_to_block(),
            state.initial_progress_ranges(),
            state.missing()
        );
    }

    let ready = plan.ready_jobs();
    metrics.ready_jobs.set(ready.len() as i64);
    for job in &ready {
        println!("ready {}", job.id());
    }
    println!("jobs total={} ready={}", plan.len(), ready.len());
    Ok(())
}

async fn squash(
    graph: ModuleGraph,
    object_store: Arc<dyn ObjectStore>,
    runtime: RuntimeConfig,
    metrics: SchedulerMetrics,
    stop_block: u64,
) -> Result<(), CommandError> {
    let scheduler = Scheduler::new(graph, Arc::clone(&object_store), runtime);
    let states = scheduler.reconcile(stop_block).await?;

    let mut squasher = Squasher::new(object_store);
    squasher.register_graph(scheduler.graph(), &states);
    let squashed = squasher.squash_all().await?;
    for (module, range) in &squashed {
        metrics.squashes_total.inc();
        println!("squashed {module} {range}");
    }
    for module in scheduler.graph().modules().iter().filter(|module| module.is_store()) {
        if let Some(end) = squasher.squashed_up_to(&module.name) {
            println!("module {} complete_up_to={end}", module.name);
        }
    }
    Ok(())
}
