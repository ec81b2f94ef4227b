//! Artifact hand-off between containers of one run.
//!
//! Published paths are copied out of a finished container into a run-local cache
//! directory; the store remembers which in-container directory each archive belongs to,
//! so later containers get the files back at the same location.

use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    archive::{self, ArchiveError},
    engine::{ContainerEngine, EngineError},
    store::{KeyValueStore, StoreError},
};

const ARCHIVE_EXT: &str = "tar";
const PARTIAL_EXT: &str = "partial";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("refusing to use {path} as artifact cache: it contains {protected}")]
    UnsafeCache { path: PathBuf, protected: PathBuf },
    #[error("could not prepare artifact cache {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not copy {path} out of container {container}: {source}")]
    CopyOut {
        path: String,
        container: String,
        #[source]
        source: EngineError,
    },
    #[error("could not copy artifact {key} into container {container}: {source}")]
    CopyIn {
        key: String,
        container: String,
        #[source]
        source: EngineError,
    },
    #[error("could not find original path for artifact {key}: {source}")]
    UnknownKey {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("artifact store: {0}")]
    Store(#[from] StoreError),
    #[error("artifact cache io: {0}")]
    Io(#[from] io::Error),
    #[error("artifact archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("artifact archive task failed: {0}")]
    Join(String),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host directory holding published archives. Wiped when the relay opens.
    pub cache_dir: PathBuf,
    /// Host paths the cache directory must never contain, such as the job file.
    /// The working directory is always protected.
    pub protected: Vec<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".artifacts"),
            protected: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn with_protected(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    /// Fail unless wiping `cache_dir` leaves the working directory and every protected
    /// path untouched.
    fn check_cache_dir(&self) -> Result<(), ArtifactError> {
        let cache_err = |source| ArtifactError::Cache {
            path: self.cache_dir.clone(),
            source,
        };
        let cache = absolute(&self.cache_dir).map_err(cache_err)?;
        let cwd = std::env::current_dir().map_err(cache_err)?;

        for protected in std::iter::once(&cwd).chain(&self.protected) {
            let protected = absolute(protected).map_err(cache_err)?;
            if protected.starts_with(&cache) {
                return Err(ArtifactError::UnsafeCache {
                    path: self.cache_dir.clone(),
                    protected,
                });
            }
        }
        Ok(())
    }
}

/// Moves artifacts between containers through the host cache.
///
/// Cheap to clone; clones share the cache, the store and the sequence counter.
#[derive(Clone)]
pub struct ArtifactRelay {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn ContainerEngine>,
    records: KeyValueStore<String>,
    cache_dir: PathBuf,
    seq: AtomicU64,
}

impl ArtifactRelay {
    /// Open the relay, discarding whatever a previous run left in the cache.
    pub async fn open(
        config: RelayConfig,
        engine: Arc<dyn ContainerEngine>,
        records: KeyValueStore<String>,
    ) -> Result<Self, ArtifactError> {
        config.check_cache_dir()?;
        let cache_dir = config.cache_dir;
        let cache_err = |source| ArtifactError::Cache {
            path: cache_dir.clone(),
            source,
        };

        match fs::remove_dir_all(&cache_dir).await {
            Ok(()) => debug!(target: "dot.core.relay", dir = %cache_dir.display(), "stale artifact cache removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(cache_err(e)),
        }
        fs::create_dir_all(&cache_dir).await.map_err(cache_err)?;

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                records,
                cache_dir,
                seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    pub fn records(&self) -> &KeyValueStore<String> {
        &self.inner.records
    }

    /// Copy `path` out of container `id` into the cache; returns the artifact key.
    ///
    /// The archive only becomes visible to [`retrieve`](Self::retrieve) once both the
    /// file and its store record are complete.
    #[instrument(level = "debug", target = "dot.core.relay", skip(self))]
    pub async fn publish(&self, id: &str, path: &str) -> Result<String, ArtifactError> {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("artifacts-{seq:06}-{}.{ARCHIVE_EXT}", Uuid::new_v4().simple());
        let final_path = self.inner.cache_dir.join(&key);
        let partial = final_path.with_extension(PARTIAL_EXT);

        let written = match self.copy_out(id, path, &partial).await {
            Ok(n) => n,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = self.inner.records.set(&key, parent_dir(path)) {
            discard(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&partial, &final_path).await {
            discard(&partial).await;
            let _ = self.inner.records.delete(&key);
            return Err(e.into());
        }

        debug!(target: "dot.core.relay", %key, path, bytes = written, "artifact published");
        Ok(key)
    }

    async fn copy_out(&self, id: &str, path: &str, dest: &Path) -> Result<u64, ArtifactError> {
        let mut file = fs::File::create(dest).await?;
        let written = self
            .inner
            .engine
            .copy_from_container(id, path, &mut file)
            .await
            .map_err(|source| ArtifactError::CopyOut {
                path: path.to_string(),
                container: id.to_string(),
                source,
            })?;
        file.flush().await?;
        Ok(written)
    }

    /// Copy cached artifacts into container `id`.
    ///
    /// With `keys`, exactly those archives are restored. Without, every published archive
    /// is restored in publication order.
    #[instrument(level = "debug", target = "dot.core.relay", skip(self))]
    pub async fn retrieve(&self, id: &str, keys: &[String]) -> Result<usize, ArtifactError> {
        let keys = if keys.is_empty() {
            self.published().await?
        } else {
            keys.iter().map(|k| k.trim().to_string()).collect()
        };

        for key in &keys {
            let dir = self.lookup(key)?;
            let cached = fs::read(self.inner.cache_dir.join(key)).await?;
            trace!(target: "dot.core.relay", %key, %dir, size = cached.len(), "restoring artifact");

            // Extracted at `/` so missing parents of `dir` are created in the container.
            let rerooted = tokio::task::spawn_blocking(move || archive::reroot(&cached, &dir))
                .await
                .map_err(|e| ArtifactError::Join(e.to_string()))??;
            self.inner
                .engine
                .copy_to_container(id, "/", Bytes::from(rerooted))
                .await
                .map_err(|source| ArtifactError::CopyIn {
                    key: key.clone(),
                    container: id.to_string(),
                    source,
                })?;
        }
        Ok(keys.len())
    }

    /// Unpack every published archive on the host under `dest`, mirroring the
    /// in-container layout (`/app/out` lands in `dest/app/out`). Returns the count.
    pub async fn export(&self, dest: &Path) -> Result<usize, ArtifactError> {
        let keys = self.published().await?;
        for key in &keys {
            let dir = self.lookup(key)?;
            let target = archive::sanitize_path(dest, Path::new(&dir))?;
            let source = self.inner.cache_dir.join(key);

            tokio::task::spawn_blocking(move || {
                let file = std::fs::File::open(&source)?;
                archive::unpack(io::BufReader::new(file), &target)
            })
            .await
            .map_err(|e| ArtifactError::Join(e.to_string()))??;
        }
        debug!(target: "dot.core.relay", dest = %dest.display(), count = keys.len(), "artifacts exported");
        Ok(keys.len())
    }

    fn lookup(&self, key: &str) -> Result<String, ArtifactError> {
        self.inner
            .records
            .get(key)
            .map_err(|source| ArtifactError::UnknownKey {
                key: key.to_string(),
                source,
            })
    }

    /// Completed archive keys in publication order.
    async fn published(&self) -> Result<Vec<String>, ArtifactError> {
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(&self.inner.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Path::new(&name).extension().is_some_and(|e| e == ARCHIVE_EXT) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(target: "dot.core.relay", path = %path.display(), error = %e, "could not remove partial artifact");
    }
}

/// Absolute form of a host path with `.` and `..` folded lexically.
fn absolute(path: &Path) -> io::Result<PathBuf> {
    let mut folded = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::ParentDir => {
                folded.pop();
            }
            Component::CurDir => {}
            other => folded.push(other),
        }
    }
    Ok(folded)
}

/// POSIX `dirname` of an in-container path.
fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }
}
