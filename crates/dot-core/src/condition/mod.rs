//! Per-job gating expressions.
//!
//! A job's variables (plus the run's global environment) form the evaluation environment;
//! the job's `condition` must type-check against it and evaluate to a boolean.

mod parse;
mod program;

pub use program::{Environment, Program, Type};

use dot_model::{Job, VarValue};
use thiserror::Error;
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("unexpected character {found:?} at offset {at}")]
    Lex { at: usize, found: char },
    #[error("unterminated string starting at offset {at}")]
    UnterminatedString { at: usize },
    #[error("invalid number {text:?} at offset {at}")]
    InvalidNumber { at: usize, text: String },
    #[error("unexpected token {found} at offset {at}")]
    Unexpected { at: usize, found: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("operator {op} cannot combine {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: Type,
        right: Type,
    },
    #[error("condition must be a boolean expression, got {0}")]
    NotBoolean(Type),
    #[error("integer overflow")]
    Overflow,
}

/// Decides whether a job belongs to its stage's run set.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    global: Environment,
}

impl ConditionEvaluator {
    /// `global_env` is visible to every condition; job variables shadow it.
    pub fn new<I, K, V>(global_env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let global = global_env
            .into_iter()
            .map(|(k, v)| (k.into(), VarValue::Str(v.into())))
            .collect();
        Self { global }
    }

    /// Evaluation environment for `job`.
    ///
    /// Fails on the first variable that is not a single key/value pair.
    pub fn environment(&self, job: &Job) -> Result<Environment, ConfigError> {
        let mut env = self.global.clone();
        for var in &job.variables {
            let (k, v) = var.pair().map_err(|source| ConfigError::Variable {
                job: job.name.clone(),
                source,
            })?;
            env.insert(k.to_string(), v.clone());
        }
        Ok(env)
    }

    /// Whether `job` should run. A missing or blank condition means `true`.
    pub fn eligible(&self, job: &Job) -> Result<bool, ConfigError> {
        let env = self.environment(job)?;
        let src = match job.condition.as_deref().map(str::trim) {
            None | Some("") => "true",
            Some(src) => src,
        };

        let invalid = |source| ConfigError::Condition {
            job: job.name.clone(),
            condition: src.to_string(),
            source,
        };
        let eligible = Program::compile(src, &env)
            .and_then(|p| p.eval(&env))
            .map_err(invalid)?;

        debug!(target: "dot.core.condition", job = %job.name, condition = src, eligible, "condition evaluated");
        Ok(eligible)
    }

    /// Filter `jobs` down to the eligible ones, preserving order.
    ///
    /// Every job is evaluated before anything is returned, so one malformed job fails
    /// the whole set.
    pub fn select<'a>(&self, jobs: &[&'a Job]) -> Result<Selection<'a>, ConfigError> {
        let mut selection = Selection::default();
        for job in jobs {
            if self.eligible(job)? {
                selection.eligible.push(job);
            } else {
                selection.skipped.push(job);
            }
        }
        Ok(selection)
    }
}

/// Outcome of [`ConditionEvaluator::select`].
#[derive(Debug, Default)]
pub struct Selection<'a> {
    pub eligible: Vec<&'a Job>,
    pub skipped: Vec<&'a Job>,
}
