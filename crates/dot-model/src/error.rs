use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read job file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse job file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no stages declared")]
    NoStages,
    #[error("stage declared twice: {0}")]
    DuplicateStage(String),
    #[error("job name must not be empty")]
    EmptyJobName,
    #[error("job declared twice: {0}")]
    DuplicateJob(String),
    #[error("job {job}: image must not be empty")]
    EmptyImage { job: String },
    #[error("stage not defined: {stage} (job {job})")]
    UndeclaredStage { job: String, stage: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("variables should be defined as a key value pair, got no entries")]
    Empty,
    #[error("variables should be defined as a key value pair, got keys: {}", .0.join(", "))]
    MultiKey(Vec<String>),
}
