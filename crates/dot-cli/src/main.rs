mod args;

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use dot_core::{
    ArtifactRelay, ConditionEvaluator, ContainerEngine, JobContext, KeyValueStore, RelayConfig,
    RunSettings, RunnerOptions, SchedulerConfig, StageScheduler, WorkloadLauncher,
};
use dot_exec::DockerEngine;
use dot_model::{Manifest, RegistryAuth};
use dot_observe::{LoggerConfig, LoggerFormat, LoggerLevel, job_output_sinks, logger_init};

use crate::args::{Cli, Cmd, RunArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = match option_env!("DOT_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};
const COMMIT: &str = match option_env!("DOT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(Cmd::Version) = cli.cmd {
        println!("Version: {VERSION}");
        println!("Build Date: {BUILD_DATE}");
        println!("Commit: {COMMIT}");
        return ExitCode::SUCCESS;
    }

    match run(cli.run).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "run failed");
            eprintln!("dot: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let format: LoggerFormat = args.log_format.parse()?;
    let level = LoggerLevel::new(&args.log_level)?;
    logger_init(&LoggerConfig::default().with_format(format).with_level(level))?;

    let manifest = Manifest::load(&args.job_file)
        .with_context(|| format!("invalid job file {}", args.job_file.display()))?;
    info!(
        file = %args.job_file.display(),
        stages = manifest.stages.len(),
        jobs = manifest.jobs.len(),
        "job file loaded"
    );

    let docker = DockerEngine::connect()?;
    docker.ping().await.context("docker daemon is not reachable")?;
    let engine: Arc<dyn ContainerEngine> = Arc::new(docker);

    let mut relay_config = RelayConfig {
        cache_dir: args.artifacts_dir.clone(),
        ..Default::default()
    }
    .with_protected(&args.job_file);
    for src in manifest.jobs.iter().filter_map(|job| job.src()) {
        relay_config = relay_config.with_protected(src);
    }
    let relay =
        ArtifactRelay::open(relay_config, Arc::clone(&engine), KeyValueStore::new()).await?;

    let settings = RunSettings {
        global_env: args.env.clone(),
        credentials: RegistryAuth::from_parts(args.username, args.password),
    };
    let evaluator = ConditionEvaluator::new(settings.global_env.iter().cloned());
    let launcher = WorkloadLauncher::new(engine, relay.clone())
        .with_options(RunnerOptions {
            show_image_pull: !args.quiet_pull,
            mount_engine_socket: args.mount_docker_socket,
            ..Default::default()
        })
        .with_settings(settings)
        .with_sinks(job_output_sinks(atty::is(atty::Stream::Stdout)));

    let scheduler = StageScheduler::new(Arc::new(launcher))
        .with_evaluator(evaluator)
        .with_config(SchedulerConfig {
            job_timeout: Duration::from_secs(args.timeout),
            cancel_siblings_on_failure: args.cancel_on_failure,
        });

    let ctx = JobContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping running jobs");
            interrupt.cancel();
        }
    });

    let summary = scheduler.run(&manifest, &ctx).await?;
    info!(
        succeeded = summary.succeeded.len(),
        skipped = summary.skipped.len(),
        "all stages completed"
    );

    if let Some(dest) = &args.export_artifacts {
        let count = relay
            .export(dest)
            .await
            .with_context(|| format!("could not export artifacts to {}", dest.display()))?;
        info!(dest = %dest.display(), count, "artifacts exported");
    }
    Ok(())
}
