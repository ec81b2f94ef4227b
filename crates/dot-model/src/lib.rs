//! Declarative job manifest model.
//!
//! These types describe *what* a run consists of (stages, jobs, variables, credentials).
//! They carry no execution logic; `dot-core` consumes them read-only.

mod error;
pub use error::{ManifestError, VariableError};

mod variable;
pub use variable::{VarValue, Variable};

mod job;
pub use job::Job;

mod manifest;
pub use manifest::Manifest;

mod auth;
pub use auth::RegistryAuth;

/// Identifier of an execution phase.
///
/// Stages run in the order they are declared; all eligible jobs of a stage run concurrently.
pub type Stage = String;
