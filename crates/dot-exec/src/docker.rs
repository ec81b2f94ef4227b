use std::io::Write;

use async_trait::async_trait;
use bollard::{
    Docker,
    auth::DockerCredentials,
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
        WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{CreateImageInfo, HostConfig, Mount, MountTypeEnum},
};
use bytes::Bytes;
use dot_core::{
    ContainerEngine, ContainerSpec, EngineError, OutputSinks,
    engine::LogStream,
};
use dot_model::RegistryAuth;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{engine_error, path_error};

/// [`ContainerEngine`] talking to a local Docker daemon.
#[derive(Clone, Debug)]
pub struct DockerEngine {
    name: &'static str,
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform default socket.
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self::from_client(docker))
    }

    pub fn from_client(docker: Docker) -> Self {
        Self {
            name: "docker",
            docker,
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Round-trip to the daemon; fails fast when it is not running.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        progress: &mut (dyn Write + Send),
    ) -> Result<(), EngineError> {
        let (repo, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image: repo.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let credentials = auth.map(|a| DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            ..Default::default()
        });

        debug!(target: "dot.exec.docker", %image, authenticated = credentials.is_some(), "pulling image");
        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| engine_error("pull image", e))?;
            if let Some(line) = progress_line(&info) {
                writeln!(progress, "{line}")?;
            }
        }
        progress.flush()?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mounts = spec
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            entrypoint: spec.entrypoint.clone(),
            working_dir: Some(spec.workdir.clone()),
            host_config: Some(HostConfig {
                mounts: (!mounts.is_empty()).then_some(mounts),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| engine_error("create container", e))?;
        for warning in &created.warnings {
            debug!(target: "dot.exec.docker", id = %created.id, %warning, "create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error("start container", e))
    }

    async fn stream_logs(&self, id: &str, sinks: &mut OutputSinks) -> Result<(), EngineError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| engine_error("read logs", e))? {
                LogOutput::StdErr { message } => sinks.write(LogStream::Stderr, &message)?,
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    sinks.write(LogStream::Stdout, &message)?
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        sinks.flush()?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(resp)) => Ok(resp.status_code),
            // The daemon reports a non-zero exit as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_error("wait for container", e)),
            None => Err(EngineError::Api(format!(
                "wait for container: no status for {id}"
            ))),
        }
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        archive: Bytes,
    ) -> Result<(), EngineError> {
        trace!(target: "dot.exec.docker", %id, %dest, size = archive.len(), "upload");
        let options = UploadToContainerOptions {
            path: dest.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive)
            .await
            .map_err(|e| path_error("copy to container", dest, e))
    }

    async fn copy_from_container(
        &self,
        id: &str,
        src: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EngineError> {
        let options = DownloadFromContainerOptions {
            path: src.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| path_error("copy from container", src, e))?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        trace!(target: "dot.exec.docker", %id, %src, bytes = written, "download");
        Ok(written)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error("remove container", e))
    }
}

/// Split an image reference into repository and tag (or digest).
///
/// An untagged reference means `latest`; the daemon would otherwise pull every tag.
fn split_reference(image: &str) -> (&str, &str) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo, digest);
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

/// `<layer id>: <status> <progress bar>`, with missing parts left out.
fn progress_line(info: &CreateImageInfo) -> Option<String> {
    let detail = [&info.status, &info.progress]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    match (info.id.as_deref().filter(|id| !id.is_empty()), detail.is_empty()) {
        (Some(id), false) => Some(format!("{id}: {detail}")),
        (Some(id), true) => Some(id.to_string()),
        (None, false) => Some(detail),
        (None, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_default_to_latest() {
        assert_eq!(split_reference("alpine"), ("alpine", "latest"));
        assert_eq!(split_reference("alpine:3.19"), ("alpine", "3.19"));
        assert_eq!(
            split_reference("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_reference("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app", "v2")
        );
        assert_eq!(
            split_reference("alpine@sha256:abc"),
            ("alpine", "sha256:abc")
        );
    }

    #[test]
    fn progress_lines() {
        let info = CreateImageInfo {
            id: Some("a1b2".into()),
            status: Some("Downloading".into()),
            progress: Some("[==>   ] 1MB/4MB".into()),
            ..Default::default()
        };
        assert_eq!(
            progress_line(&info).as_deref(),
            Some("a1b2: Downloading [==>   ] 1MB/4MB")
        );

        let status_only = CreateImageInfo {
            status: Some("Pulling from library/alpine".into()),
            ..Default::default()
        };
        assert_eq!(
            progress_line(&status_only).as_deref(),
            Some("Pulling from library/alpine")
        );
        assert_eq!(progress_line(&CreateImageInfo::default()), None);
    }
}
