//! Container-engine seam.
//!
//! Everything that talks to a container daemon goes through [`ContainerEngine`]; the Docker
//! implementation lives in `dot-exec`.

mod output;

pub use output::{OutputSinks, SinkFactory, std_sinks};

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use dot_model::RegistryAuth;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Default path of the engine's control socket on the host.
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    #[error("no such container: {0}")]
    NoSuchContainer(String),
    #[error("no such path in container: {0}")]
    NoSuchPath(String),
    #[error("engine request failed: {0}")]
    Api(String),
    #[error("output: {0}")]
    Io(#[from] std::io::Error),
}

/// Host path bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Empty means "use the image default".
    pub cmd: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub workdir: String,
    pub mounts: Vec<BindMount>,
}

/// Which container stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Minimal surface of a container engine used by the runner and the artifact relay.
///
/// Long calls (`pull_image`, `stream_logs`, `wait_container`) are cancelled by dropping
/// the returned future; implementations must tolerate that.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pull `image`, writing human-readable progress lines to `progress`.
    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        progress: &mut (dyn Write + Send),
    ) -> Result<(), EngineError>;

    /// Create (but do not start) a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Follow the container's output until it ends, demultiplexing into `sinks`.
    async fn stream_logs(&self, id: &str, sinks: &mut OutputSinks) -> Result<(), EngineError>;

    /// Block until the container stops; returns its exit status.
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    /// Extract a tar `archive` into directory `dest` inside the container.
    async fn copy_to_container(&self, id: &str, dest: &str, archive: Bytes)
    -> Result<(), EngineError>;

    /// Stream `src` out of the container as a tar archive into `out`.
    ///
    /// Archive entries are named relative to the parent directory of `src`.
    /// Returns the number of bytes written.
    async fn copy_from_container(
        &self,
        id: &str,
        src: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EngineError>;

    /// Force-remove a container, running or not.
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;
}
