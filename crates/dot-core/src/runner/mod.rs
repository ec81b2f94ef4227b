//! Execution of a single job inside its own container.
//!
//! ```text
//! Configured -> ImagePulled -> Created -> SourceInjected -> ArtifactsRestored
//!            -> Started -> LogsStreamed -> Waited -> Succeeded | Failed
//! ```
//!
//! Any step may fail into `Failed`. Once a container exists it is removed no matter
//! how the run ends.

mod handle;

pub use handle::RunHandle;

use std::{
    fmt, io,
    io::Write,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use dot_model::{Job, RegistryAuth};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    archive,
    context::{Interrupt, JobContext},
    engine::{
        BindMount, ContainerEngine, ContainerSpec, DEFAULT_ENGINE_SOCKET, EngineError,
        OutputSinks, SinkFactory, std_sinks,
    },
    error::{ConfigError, JobError, SourceError, Step},
    relay::ArtifactRelay,
    scheduler::Launcher,
};
use handle::ContainerGuard;

/// Per-container knobs shared by every job of a run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Copy image pull progress to the job's stdout sink.
    pub show_image_pull: bool,
    /// Bind-mount the engine socket so jobs can drive the engine themselves.
    pub mount_engine_socket: bool,
    pub engine_socket: String,
    /// In-container working directory; sources land here, artifact paths are relative to it.
    pub workdir: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            show_image_pull: true,
            mount_engine_socket: false,
            engine_socket: DEFAULT_ENGINE_SOCKET.to_string(),
            workdir: "/app".to_string(),
        }
    }
}

/// Run-wide inputs that come from the invocation rather than the manifest.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Appended to every container's environment after the job variables.
    pub global_env: Vec<(String, String)>,
    pub credentials: Option<RegistryAuth>,
}

/// Lifecycle position of a [`WorkloadRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Configured,
    ImagePulled,
    Created,
    SourceInjected,
    ArtifactsRestored,
    Started,
    LogsStreamed,
    Waited,
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives one job's container from image pull to removal.
pub struct WorkloadRunner {
    job: Job,
    handle: RunHandle,
    engine: Arc<dyn ContainerEngine>,
    relay: ArtifactRelay,
    options: RunnerOptions,
    settings: Arc<RunSettings>,
    sinks: OutputSinks,
    state: JobState,
}

impl WorkloadRunner {
    pub fn new(job: Job, engine: Arc<dyn ContainerEngine>, relay: ArtifactRelay) -> Self {
        Self {
            handle: RunHandle::for_job(&job.name),
            job,
            engine,
            relay,
            options: RunnerOptions::default(),
            settings: Arc::new(RunSettings::default()),
            sinks: OutputSinks::default(),
            state: JobState::Pending,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_settings(mut self, settings: Arc<RunSettings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sinks(mut self, sinks: OutputSinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// Container definition for this job: name, image, env, command, mounts.
    pub fn container_spec(&self) -> Result<ContainerSpec, JobError> {
        let mut env = Vec::with_capacity(self.job.variables.len() + self.settings.global_env.len());
        for var in &self.job.variables {
            let entry = var.to_env().map_err(|source| ConfigError::Variable {
                job: self.job.name.clone(),
                source,
            })?;
            env.push(entry);
        }
        env.extend(self.settings.global_env.iter().map(|(k, v)| format!("{k}={v}")));

        let script = self.job.script.join("\n");
        let entrypoint = self.job.entrypoint().map(<[String]>::to_vec);
        let cmd = match (&entrypoint, script.is_empty()) {
            (_, true) => Vec::new(),
            (Some(_), false) => vec![script],
            (None, false) => vec!["/bin/sh".to_string(), "-c".to_string(), script],
        };

        let mut mounts = Vec::new();
        if self.options.mount_engine_socket {
            mounts.push(BindMount {
                source: self.options.engine_socket.clone(),
                target: self.options.engine_socket.clone(),
            });
        }

        Ok(ContainerSpec {
            name: self.handle.name().to_string(),
            image: self.job.image.clone(),
            env,
            cmd,
            entrypoint,
            workdir: self.options.workdir.clone(),
            mounts,
        })
    }

    /// Run the job to completion. The container, once created, is always removed.
    #[instrument(
        level = "info",
        target = "dot.core.runner",
        skip_all,
        fields(job = %self.job.name, container = %self.handle)
    )]
    pub async fn run(mut self, ctx: &JobContext) -> Result<(), JobError> {
        let result = self.execute(ctx).await;
        match &result {
            Ok(()) => {
                self.advance(JobState::Succeeded);
                info!(target: "dot.core.runner", "job succeeded");
            }
            Err(e) => {
                self.advance(JobState::Failed);
                warn!(target: "dot.core.runner", error = %e, "job failed");
            }
        }
        result
    }

    async fn execute(&mut self, ctx: &JobContext) -> Result<(), JobError> {
        let spec = self.container_spec()?;
        self.advance(JobState::Configured);

        self.pull(ctx).await?;
        self.advance(JobState::ImagePulled);

        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| self.engine_error(Step::Create, e))?;
        self.handle.bind(id.clone());
        let guard = ContainerGuard::new(Arc::clone(&self.engine), id.clone());
        self.advance(JobState::Created);
        debug!(target: "dot.core.runner", %id, image = %spec.image, "container created");

        let result = self.drive(ctx, &id).await;
        match (result, guard.release().await) {
            (Ok(()), Err(e)) => Err(self.engine_error(Step::Remove, e)),
            (Err(e), Err(remove)) => {
                warn!(target: "dot.core.runner", %id, error = %remove, "could not remove container");
                Err(e)
            }
            (result, Ok(())) => result,
        }
    }

    async fn pull(&mut self, ctx: &JobContext) -> Result<(), JobError> {
        let auth = self.settings.credentials.as_ref();
        let mut discard = io::sink();
        let progress: &mut (dyn Write + Send) = if self.options.show_image_pull {
            self.sinks.stdout.as_mut()
        } else {
            &mut discard
        };

        let pulled = tokio::select! {
            biased;
            res = self.engine.pull_image(&self.job.image, auth, progress) => res,
            why = ctx.done() => return Err(interrupted(&self.job.name, why)),
        };
        pulled.map_err(|e| self.engine_error(Step::Pull, e))
    }

    async fn drive(&mut self, ctx: &JobContext, id: &str) -> Result<(), JobError> {
        self.inject_source(id).await?;
        self.advance(JobState::SourceInjected);

        self.relay
            .retrieve(id, &[])
            .await
            .map_err(|source| JobError::Retrieve {
                job: self.job.name.clone(),
                source,
            })?;
        self.advance(JobState::ArtifactsRestored);

        if let Some(why) = ctx.interrupted() {
            return Err(interrupted(&self.job.name, why));
        }
        self.engine
            .start_container(id)
            .await
            .map_err(|e| self.engine_error(Step::Start, e))?;
        self.advance(JobState::Started);

        let streamed = tokio::select! {
            biased;
            res = self.engine.stream_logs(id, &mut self.sinks) => res,
            why = ctx.done() => return Err(interrupted(&self.job.name, why)),
        };
        streamed.map_err(|e| self.engine_error(Step::Logs, e))?;
        self.advance(JobState::LogsStreamed);

        let waited = tokio::select! {
            biased;
            res = self.engine.wait_container(id) => res,
            why = ctx.done() => return Err(interrupted(&self.job.name, why)),
        };
        let code = waited.map_err(|e| self.engine_error(Step::Wait, e))?;
        self.advance(JobState::Waited);

        if code != 0 {
            return Err(JobError::ExitFailure {
                job: self.job.name.clone(),
                code,
            });
        }
        self.publish(id).await
    }

    async fn inject_source(&mut self, id: &str) -> Result<(), JobError> {
        let Some(src) = self.job.src().map(clean_path) else {
            return Ok(());
        };
        let source_error = |source: SourceError| JobError::Source {
            job: self.job.name.clone(),
            source,
        };

        trace!(target: "dot.core.runner", src = %src.display(), "packing sources");
        let packed = tokio::task::spawn_blocking(move || archive::pack(&src))
            .await
            .map_err(|e| source_error(SourceError::Join(e.to_string())))?
            .map_err(|e| source_error(e.into()))?;

        self.engine
            .copy_to_container(id, &self.options.workdir, Bytes::from(packed))
            .await
            .map_err(|e| source_error(e.into()))
    }

    async fn publish(&mut self, id: &str) -> Result<(), JobError> {
        for path in &self.job.artifacts {
            let in_container = container_path(&self.options.workdir, path);
            let key = self
                .relay
                .publish(id, &in_container)
                .await
                .map_err(|source| JobError::Publish {
                    job: self.job.name.clone(),
                    source,
                })?;
            info!(target: "dot.core.runner", path = %in_container, %key, "artifact published");
        }
        Ok(())
    }

    fn engine_error(&self, step: Step, source: EngineError) -> JobError {
        JobError::Engine {
            job: self.job.name.clone(),
            step,
            source,
        }
    }

    fn advance(&mut self, next: JobState) {
        trace!(target: "dot.core.runner", from = %self.state, to = %next, "state");
        self.state = next;
    }
}

fn interrupted(job: &str, why: Interrupt) -> JobError {
    let job = job.to_string();
    match why {
        Interrupt::Timeout => {
            warn!(target: "dot.core.runner", %job, "context timed out, stopping container");
            JobError::Timeout { job }
        }
        Interrupt::Canceled => JobError::Canceled { job },
    }
}

/// Lexically normalise a host path: drop `.`, fold `..` where a parent is known.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// `workdir` joined with an artifact path, POSIX-style. Absolute artifact paths are
/// still taken relative to `workdir`.
fn container_path(workdir: &str, path: &str) -> String {
    let workdir = workdir.trim_end_matches('/');
    let path = path.trim_start_matches("./").trim_start_matches('/');
    format!("{workdir}/{path}")
}

/// Launches jobs as [`WorkloadRunner`]s against one engine and relay.
#[derive(Clone)]
pub struct WorkloadLauncher {
    engine: Arc<dyn ContainerEngine>,
    relay: ArtifactRelay,
    options: RunnerOptions,
    settings: Arc<RunSettings>,
    sinks: SinkFactory,
}

impl WorkloadLauncher {
    pub fn new(engine: Arc<dyn ContainerEngine>, relay: ArtifactRelay) -> Self {
        Self {
            engine,
            relay,
            options: RunnerOptions::default(),
            settings: Arc::new(RunSettings::default()),
            sinks: std_sinks(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_sinks(mut self, sinks: SinkFactory) -> Self {
        self.sinks = sinks;
        self
    }
}

#[async_trait]
impl Launcher for WorkloadLauncher {
    fn name(&self) -> &'static str {
        self.engine.name()
    }

    async fn launch(&self, job: Job, ctx: JobContext) -> Result<(), JobError> {
        let sinks = (self.sinks)(&job);
        WorkloadRunner::new(job, Arc::clone(&self.engine), self.relay.clone())
            .with_options(self.options.clone())
            .with_settings(Arc::clone(&self.settings))
            .with_sinks(sinks)
            .run(&ctx)
            .await
    }
}
