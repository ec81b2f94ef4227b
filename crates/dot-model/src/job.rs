use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Stage, Variable};

/// One unit of work executed inside its own container.
///
/// Constructed once from the manifest and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique name within a run.
    pub name: String,
    /// Stage this job belongs to; must be declared in the manifest.
    pub stage: Stage,
    /// Host directory copied into the container's working directory before start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<PathBuf>,
    /// Image reference, same format as `docker pull <ref>`.
    pub image: String,
    /// Shell lines, joined with newlines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
    /// Overrides the image entrypoint. The joined script becomes its single argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    /// Paths relative to the in-container working directory, published after a successful run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Boolean expression over the job variables. Absent means `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, stage: impl Into<Stage>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_src(mut self, src: impl Into<PathBuf>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_script<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_artifacts<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Entrypoint override, treating an empty list as "use the image default".
    pub fn entrypoint(&self) -> Option<&[String]> {
        self.entrypoint.as_deref().filter(|e| !e.is_empty())
    }

    /// Source tree to inject, treating an empty path as "nothing to inject".
    pub fn src(&self) -> Option<&std::path::Path> {
        self.src.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_optionals_are_treated_as_absent() {
        let job = Job::new("build", "build", "alpine")
            .with_src("")
            .with_entrypoint(Vec::<String>::new());
        assert!(job.src().is_none());
        assert!(job.entrypoint().is_none());
    }

    #[test]
    fn yaml_job_defaults() {
        let job: Job = serde_yaml::from_str("name: lint\nstage: test\nimage: alpine\n").unwrap();
        assert_eq!(job.name, "lint");
        assert!(job.script.is_empty());
        assert!(job.variables.is_empty());
        assert!(job.artifacts.is_empty());
        assert!(job.condition.is_none());
        assert!(job.src().is_none());
    }
}
