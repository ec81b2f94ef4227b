//! Stage-ordered, job-concurrent execution of a manifest.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dot_model::{Job, Manifest};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::{
    condition::ConditionEvaluator,
    context::JobContext,
    error::{ConfigError, JobError, RunError},
};

/// Starts a single job. Implemented by the container runner; tests substitute their own.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn launch(&self, job: Job, ctx: JobContext) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single job, measured from its launch.
    pub job_timeout: Duration,
    /// Cancel the rest of a stage as soon as one of its jobs fails.
    pub cancel_siblings_on_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(60 * 60),
            cancel_siblings_on_failure: false,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs that ran and succeeded, in completion order.
    pub succeeded: Vec<String>,
    /// Jobs whose condition evaluated to false.
    pub skipped: Vec<String>,
}

/// Runs stages one after another; the eligible jobs of a stage run concurrently and the
/// stage ends only when all of them have.
pub struct StageScheduler {
    launcher: Arc<dyn Launcher>,
    evaluator: ConditionEvaluator,
    config: SchedulerConfig,
}

impl StageScheduler {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            evaluator: ConditionEvaluator::default(),
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: ConditionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute `manifest` under `ctx`.
    ///
    /// The manifest is validated before anything starts. The first failing job (in
    /// completion order) fails its stage and later stages never start.
    #[instrument(
        level = "info",
        target = "dot.core.scheduler",
        skip_all,
        fields(launcher = self.launcher.name(), stages = manifest.stages.len())
    )]
    pub async fn run(&self, manifest: &Manifest, ctx: &JobContext) -> Result<RunSummary, RunError> {
        manifest.validate().map_err(ConfigError::from)?;

        let mut summary = RunSummary::default();
        for (stage, jobs) in manifest.jobs_by_stage() {
            let selection = self.evaluator.select(&jobs)?;
            for job in &selection.skipped {
                info!(target: "dot.core.scheduler", %stage, job = %job.name, "condition false, skipping job");
                summary.skipped.push(job.name.clone());
            }
            if selection.eligible.is_empty() {
                info!(target: "dot.core.scheduler", %stage, "no eligible jobs in stage");
                continue;
            }

            info!(target: "dot.core.scheduler", %stage, jobs = selection.eligible.len(), "stage started");
            let done = self.run_stage(stage, &selection.eligible, ctx).await?;
            info!(target: "dot.core.scheduler", %stage, "stage finished");
            summary.succeeded.extend(done);
        }
        Ok(summary)
    }

    async fn run_stage(
        &self,
        stage: &str,
        jobs: &[&Job],
        ctx: &JobContext,
    ) -> Result<Vec<String>, RunError> {
        let stage_ctx = ctx.child();
        let mut set = JoinSet::new();
        for job in jobs {
            let launcher = Arc::clone(&self.launcher);
            let job = (*job).clone();
            let job_ctx = stage_ctx.with_timeout(self.config.job_timeout);
            set.spawn(async move {
                let name = job.name.clone();
                (name, launcher.launch(job, job_ctx).await)
            });
        }

        let mut succeeded = Vec::new();
        let mut first: Option<RunError> = None;
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    succeeded.push(name);
                    continue;
                }
                Ok((_, Err(source))) => RunError::Stage {
                    stage: stage.to_string(),
                    source,
                },
                Err(e) => RunError::Join {
                    stage: stage.to_string(),
                    reason: e.to_string(),
                },
            };

            if first.is_some() {
                warn!(target: "dot.core.scheduler", %stage, error = %failure, "additional job failure");
                continue;
            }
            error!(target: "dot.core.scheduler", %stage, error = %failure, "job failed");
            if self.config.cancel_siblings_on_failure {
                stage_ctx.cancel();
            }
            first = Some(failure);
        }

        match first {
            Some(err) => Err(err),
            None => Ok(succeeded),
        }
    }
}
