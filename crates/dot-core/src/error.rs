use std::fmt;

use dot_model::{ManifestError, VariableError};
use thiserror::Error;

use crate::{
    archive::ArchiveError, condition::ConditionError, engine::EngineError, relay::ArtifactError,
};

/// Problems in the manifest itself; detected before any container is created for a stage.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("job {job}: {source}")]
    Variable {
        job: String,
        #[source]
        source: VariableError,
    },
    #[error("job {job}: invalid condition `{condition}`: {source}")]
    Condition {
        job: String,
        condition: String,
        #[source]
        source: ConditionError,
    },
}

/// Container-engine step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pull,
    Create,
    Start,
    Logs,
    Wait,
    Remove,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Pull => "pull image",
            Step::Create => "create container",
            Step::Start => "start container",
            Step::Logs => "read container logs",
            Step::Wait => "wait for container",
            Step::Remove => "remove container",
        })
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("archiver task failed: {0}")]
    Join(String),
}

/// Failure of a single job. Every variant names the job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("could not {step} for {job}: {source}")]
    Engine {
        job: String,
        step: Step,
        #[source]
        source: EngineError,
    },
    #[error("unable to create source directories for {job}: {source}")]
    Source {
        job: String,
        #[source]
        source: SourceError,
    },
    #[error("unable to retrieve artifacts for {job}: {source}")]
    Retrieve {
        job: String,
        #[source]
        source: ArtifactError,
    },
    #[error("unable to publish artifacts for {job}: {source}")]
    Publish {
        job: String,
        #[source]
        source: ArtifactError,
    },
    #[error("container {job} exited with status code {code}")]
    ExitFailure { job: String, code: i64 },
    #[error("context timed out, stopping container {job}")]
    Timeout { job: String },
    #[error("job {job} was canceled")]
    Canceled { job: String },
}

impl JobError {
    /// Name of the failed job, when the error is job-scoped.
    pub fn job(&self) -> Option<&str> {
        match self {
            JobError::Config(ConfigError::Variable { job, .. })
            | JobError::Config(ConfigError::Condition { job, .. }) => Some(job),
            JobError::Config(ConfigError::Manifest(_)) => None,
            JobError::Engine { job, .. }
            | JobError::Source { job, .. }
            | JobError::Retrieve { job, .. }
            | JobError::Publish { job, .. }
            | JobError::ExitFailure { job, .. }
            | JobError::Timeout { job }
            | JobError::Canceled { job } => Some(job),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout { .. })
    }

    /// Container exit status, for [`JobError::ExitFailure`].
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            JobError::ExitFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failure of a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: JobError,
    },
    #[error("stage {stage}: job task aborted: {reason}")]
    Join { stage: String, reason: String },
}

impl RunError {
    /// The job error that failed the run, if a job failed.
    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            RunError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}
