//! Execution core: stage scheduling, per-job container lifecycle, artifact relay,
//! condition evaluation and the archive helpers they share.

pub mod archive;
pub mod condition;
pub use condition::{ConditionError, ConditionEvaluator};

pub mod context;
pub use context::{Interrupt, JobContext};

pub mod engine;
pub use engine::{ContainerEngine, ContainerSpec, EngineError, OutputSinks, SinkFactory};

pub mod error;
pub use error::{ConfigError, JobError, RunError, Step};

pub mod relay;
pub use relay::{ArtifactError, ArtifactRelay, RelayConfig};

pub mod runner;
pub use runner::{RunHandle, RunSettings, RunnerOptions, WorkloadLauncher, WorkloadRunner};

pub mod scheduler;
pub use scheduler::{Launcher, RunSummary, SchedulerConfig, StageScheduler};

pub mod store;
pub use store::{KeyValueStore, StoreError};

#[cfg(test)]
mod testing;
