use crate::domain::{
    BuildContext, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, OutputChunk,
    OutputSource, OutputStream, ProgressEvent, ProgressStream, RemoveOptions, RuntimeError,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::ContainerStateStatusEnum;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Docker Engine API client over the local socket.
#[derive(Debug, Clone)]
pub struct DockerAdapter {
    docker: Docker,
}

impl DockerAdapter {
    /// Connects using `DOCKER_HOST` or the platform default socket.
    pub fn new() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Api {
                status_code,
                message,
            },
            BollardError::DockerStreamError { error } => RuntimeError::Progress(error),
            other => RuntimeError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerAdapter {
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker.inspect_image(image).await?;
        Ok(())
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> Result<ProgressStream<'a>, RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .map(|item| {
                let info = item?;
                match info.error {
                    Some(error) => Err(RuntimeError::Progress(error)),
                    None => Ok(ProgressEvent {
                        status: info.status,
                        detail: info.progress,
                    }),
                }
            });

        Ok(stream.boxed())
    }

    fn build_image<'a>(
        &'a self,
        tag: &'a str,
        context: &'a BuildContext,
    ) -> Result<ProgressStream<'a>, RuntimeError> {
        let archive = package_context(context).map_err(RuntimeError::Context)?;
        let options = BuildImageOptions {
            dockerfile: context.dockerfile.clone(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let stream = self
            .docker
            .build_image(options, None, Some(archive.into()))
            .map(|item| {
                let info = item?;
                match info.error {
                    Some(error) => Err(RuntimeError::Progress(error)),
                    None => Ok(ProgressEvent {
                        status: info.status,
                        detail: info.stream,
                    }),
                }
            });

        Ok(stream.boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let config = engine_config(spec)?;

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &created.warnings {
            warn!(container = %created.id, "{warning}");
        }

        Ok(created.id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerState {
            status: state
                .status
                .map(status_from_engine)
                .unwrap_or(ContainerStatus::Unknown),
            exit_code: state.exit_code.unwrap_or_default(),
            error: state.error.filter(|e| !e.is_empty()),
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_period: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: grace_period.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            v: options.volumes,
            force: options.force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn attach_container(&self, id: &str) -> Result<OutputStream, RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };

        let attached = self.docker.attach_container(id, Some(options)).await?;
        debug!(container = %id, "attached to container output");

        let stream = attached
            .output
            .map(|frame| frame.map(chunk_from_frame).map_err(RuntimeError::from));

        Ok(stream.boxed())
    }
}

/// Typed creation body. Fields the client does not model are dropped, so they are reported.
fn engine_config(spec: &ContainerSpec) -> Result<Config<String>, RuntimeError> {
    let body = spec.to_engine_config();
    let config: Config<String> = serde_json::from_value(body.clone())
        .map_err(|e| RuntimeError::InvalidConfig(e.to_string()))?;

    let kept =
        serde_json::to_value(&config).map_err(|e| RuntimeError::InvalidConfig(e.to_string()))?;
    for field in unmodeled_fields(&body, &kept) {
        warn!(field = %field, "engine config field is not supported and was dropped");
    }
    Ok(config)
}

/// Dotted paths present in `sent` but missing from `kept`. Null values are ignored.
fn unmodeled_fields(sent: &Value, kept: &Value) -> Vec<String> {
    let mut dropped = Vec::new();
    collect_unmodeled(sent, kept, "", &mut dropped);
    dropped
}

fn collect_unmodeled(sent: &Value, kept: &Value, prefix: &str, dropped: &mut Vec<String>) {
    let (Value::Object(sent), Value::Object(kept)) = (sent, kept) else {
        return;
    };

    for (key, value) in sent {
        if value.is_null() {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match kept.get(key) {
            Some(kept_value) => collect_unmodeled(value, kept_value, &path, dropped),
            None => dropped.push(path),
        }
    }
}

fn status_from_engine(status: ContainerStateStatusEnum) -> ContainerStatus {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
        ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
        ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
        ContainerStateStatusEnum::RESTARTING => ContainerStatus::Restarting,
        ContainerStateStatusEnum::REMOVING => ContainerStatus::Removing,
        ContainerStateStatusEnum::EXITED => ContainerStatus::Exited,
        ContainerStateStatusEnum::DEAD => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

fn chunk_from_frame(frame: LogOutput) -> OutputChunk {
    let (source, message) = match frame {
        LogOutput::StdOut { message } => (OutputSource::StdOut, message),
        LogOutput::StdErr { message } => (OutputSource::StdErr, message),
        LogOutput::StdIn { message } => (OutputSource::StdOut, message),
        LogOutput::Console { message } => (OutputSource::Console, message),
    };

    OutputChunk {
        source,
        data: message.to_vec(),
    }
}

/// Tars the listed sources, keeping their paths relative to the context directory.
fn package_context(context: &BuildContext) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());

    for src in &context.src {
        let path = context.context.join(src);
        if path.is_dir() {
            archive.append_dir_all(src, &path)?;
        } else {
            archive.append_path_with_name(&path, src)?;
        }
    }

    archive.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_server_error_keeps_status_code() {
        let err = RuntimeError::from(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: ubuntu:18.04".to_string(),
        });

        assert!(err.is_not_found());
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_stream_error_is_progress_failure() {
        let err = RuntimeError::from(BollardError::DockerStreamError {
            error: "manifest unknown".to_string(),
        });

        assert!(matches!(err, RuntimeError::Progress(ref msg) if msg == "manifest unknown"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_from_engine(ContainerStateStatusEnum::EXITED),
            ContainerStatus::Exited
        );
        assert_eq!(
            status_from_engine(ContainerStateStatusEnum::RUNNING),
            ContainerStatus::Running
        );
        assert_eq!(
            status_from_engine(ContainerStateStatusEnum::EMPTY),
            ContainerStatus::Unknown
        );
    }

    fn spec_with(overrides: Value) -> ContainerSpec {
        ContainerSpec {
            image: "ubuntu:18.04".into(),
            command: vec!["true".into()],
            ports: vec![crate::domain::PortMapping::new("80", "8080")],
            tty: true,
            attach_stdout: true,
            attach_stderr: true,
            attach_stdin: false,
            overrides: match overrides {
                Value::Object(map) => map,
                _ => Default::default(),
            },
        }
    }

    #[test]
    fn test_engine_config_keeps_known_overrides() -> anyhow::Result<()> {
        let spec = spec_with(serde_json::json!({
            "WorkingDir": "/data",
            "HostConfig": { "Privileged": true }
        }));

        let config = engine_config(&spec)?;
        let kept = serde_json::to_value(&config)?;

        assert_eq!(config.working_dir.as_deref(), Some("/data"));
        assert!(unmodeled_fields(&spec.to_engine_config(), &kept).is_empty());
        Ok(())
    }

    #[test]
    fn test_unmodeled_override_fields_are_reported() -> anyhow::Result<()> {
        let spec = spec_with(serde_json::json!({
            "WorkDir": "/data",
            "HostConfig": { "Privilegd": true }
        }));

        let kept = serde_json::to_value(engine_config(&spec)?)?;
        let mut dropped = unmodeled_fields(&spec.to_engine_config(), &kept);
        dropped.sort();

        assert_eq!(dropped, vec!["HostConfig.Privilegd", "WorkDir"]);
        Ok(())
    }

    #[test]
    fn test_package_context_uses_relative_names() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Dockerfile"), "FROM ubuntu:18.04\n")?;
        fs::create_dir(dir.path().join("scripts"))?;
        fs::write(dir.path().join("scripts/run.sh"), "echo ok\n")?;

        let context = BuildContext::new(
            dir.path(),
            vec![PathBuf::from("Dockerfile"), PathBuf::from("scripts")],
        );
        let bytes = package_context(&context)?;

        let mut archive = tar::Archive::new(&bytes[..]);
        let mut names = Vec::new();
        for entry in archive.entries()? {
            names.push(entry?.path()?.to_string_lossy().into_owned());
        }

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.iter().any(|n| n == "scripts/run.sh"));
        Ok(())
    }

    #[test]
    fn test_package_context_missing_file_fails() {
        let context = BuildContext::new("/nonexistent-context", vec![PathBuf::from("Dockerfile")]);
        assert!(package_context(&context).is_err());
    }
}
