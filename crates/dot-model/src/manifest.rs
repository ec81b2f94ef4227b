use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Job, ManifestError, Stage};

/// The job file: ordered stages plus the jobs assigned to them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub stages: Vec<Stage>,
    pub jobs: Vec<Job>,
}

impl Manifest {
    pub fn new<I, S>(stages: I, jobs: Vec<Job>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Stage>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            jobs,
        }
    }

    /// Parse a YAML job file. The result is not validated.
    pub fn from_yaml_str(s: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Read, parse and validate a YAML job file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::from_yaml_str(&contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check structural invariants.
    ///
    /// Stage ids and job names are unique, every job has a name and an image,
    /// and every job references a declared stage.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.stages.is_empty() {
            return Err(ManifestError::NoStages);
        }

        let mut stages = HashSet::with_capacity(self.stages.len());
        for stage in &self.stages {
            if !stages.insert(stage.as_str()) {
                return Err(ManifestError::DuplicateStage(stage.clone()));
            }
        }

        let mut names = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(ManifestError::EmptyJobName);
            }
            if !names.insert(job.name.as_str()) {
                return Err(ManifestError::DuplicateJob(job.name.clone()));
            }
            if job.image.trim().is_empty() {
                return Err(ManifestError::EmptyImage {
                    job: job.name.clone(),
                });
            }
            if !stages.contains(job.stage.as_str()) {
                return Err(ManifestError::UndeclaredStage {
                    job: job.name.clone(),
                    stage: job.stage.clone(),
                });
            }
        }
        Ok(())
    }

    /// Group jobs by stage, in declared stage order and declared job order.
    ///
    /// Stages without jobs are included with an empty list.
    pub fn jobs_by_stage(&self) -> Vec<(&Stage, Vec<&Job>)> {
        self.stages
            .iter()
            .map(|stage| {
                let jobs = self.jobs.iter().filter(|j| &j.stage == stage).collect();
                (stage, jobs)
            })
            .collect()
    }
}
