use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{ContainerEngine, EngineError};

/// Identity of one job execution: a unique container name, plus the engine's
/// container id once the container exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    name: String,
    container_id: Option<String>,
}

impl RunHandle {
    /// `<slug of job name>-<uuid>`; the slug keeps `[a-z0-9]` and folds everything else to `-`.
    pub fn for_job(job: &str) -> Self {
        let mut slug = String::with_capacity(job.len());
        for c in job.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        let slug = if slug.is_empty() { "job" } else { slug };

        Self {
            name: format!("{slug}-{}", Uuid::new_v4().simple()),
            container_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub(crate) fn bind(&mut self, id: impl Into<String>) {
        self.container_id = Some(id.into());
    }
}

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Owns a created container until it is removed.
///
/// [`release`](Self::release) removes it in-line. If the guard is dropped without being
/// released (the job future was aborted or panicked), removal is spawned on the runtime.
pub(crate) struct ContainerGuard {
    engine: Arc<dyn ContainerEngine>,
    id: Option<String>,
}

impl ContainerGuard {
    pub fn new(engine: Arc<dyn ContainerEngine>, id: String) -> Self {
        Self {
            engine,
            id: Some(id),
        }
    }

    pub async fn release(mut self) -> Result<(), EngineError> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        self.engine.remove_container(&id).await?;
        debug!(target: "dot.core.runner", %id, "container removed");
        Ok(())
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(target: "dot.core.runner", %id, "no runtime left, container not removed");
            return;
        };
        let engine = Arc::clone(&self.engine);
        rt.spawn(async move {
            if let Err(e) = engine.remove_container(&id).await {
                warn!(target: "dot.core.runner", %id, error = %e, "deferred container removal failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug(job: &str) -> String {
        let name = RunHandle::for_job(job).name;
        let (slug, id) = name.rsplit_once('-').unwrap();
        assert_eq!(id.len(), 32);
        slug.to_string()
    }

    #[test]
    fn names_are_slugged() {
        assert_eq!(slug("Build & Test"), "build-test");
        assert_eq!(slug("--lint--"), "lint");
        assert_eq!(slug("unit_tests.v2"), "unit-tests-v2");
        assert_eq!(slug("日本"), "job");
        assert_eq!(slug(""), "job");
    }

    #[test]
    fn names_are_unique() {
        assert_ne!(RunHandle::for_job("a"), RunHandle::for_job("a"));
    }

    #[test]
    fn container_id_is_bound_once_created() {
        let mut handle = RunHandle::for_job("build");
        assert_eq!(handle.container_id(), None);
        handle.bind("c0ffee");
        assert_eq!(handle.container_id(), Some("c0ffee"));
        assert!(handle.to_string().starts_with("build-"));
    }
}
