use crate::domain::PortMapping;
use crate::infra::DockerAdapter;
use crate::infra::config::{AppConfig, BuildConfig, StdioMode, load_optional_config};
use crate::services::{Controller, StartOptions, SystemProcess};
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Image selection shared by `run` and `setup`.
#[derive(Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Image reference (repository[:tag])
    #[arg(long, short = 'i')]
    pub image: Option<String>,

    /// Build the image from this directory instead of pulling it
    #[arg(long)]
    pub build_context: Option<PathBuf>,

    /// Files from the build context to send (default: the whole directory)
    #[arg(long = "build-src", requires = "build_context")]
    pub build_src: Vec<PathBuf>,

    /// Dockerfile name inside the build context
    #[arg(long, requires = "build_context")]
    pub dockerfile: Option<String>,
}

impl ImageArgs {
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            image: self.image.clone(),
            build: BuildConfig {
                context: self.build_context.clone(),
                src: self.build_src.clone(),
                dockerfile: self.dockerfile.clone(),
            },
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Publish a container port on the host (CONTAINER:HOST)
    #[arg(long = "publish", short = 'p')]
    pub ports: Vec<PortMapping>,

    /// Do not attach output nor wait; runs until a termination signal
    #[arg(long)]
    pub detach: bool,

    /// Where container output goes
    #[arg(long, value_enum)]
    pub stdio: Option<StdioMode>,

    /// Start an existing container instead of creating one
    #[arg(long)]
    pub container_id: Option<String>,

    /// Return after starting instead of waiting for the container to exit
    #[arg(long)]
    pub no_wait: bool,

    /// Keep the container after it exits
    #[arg(long)]
    pub keep: bool,

    /// Command overriding the image default
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Values given on the command line, to be merged over the config file.
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            detach: self.detach.then_some(true),
            ports: self.ports.clone(),
            stdio: self.stdio,
            ..self.image.to_config()
        }
    }
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_optional_config(config_path)?;
    config.merge(args.to_config());
    let build = config.build_context();
    let options = config.into_options()?;

    let runtime = Arc::new(DockerAdapter::new().context("connecting to docker")?);
    let controller = Arc::new(Controller::new(runtime, options));
    controller.load_exit_handler(SystemProcess);

    controller
        .setup(build.as_ref())
        .await
        .with_context(|| format!("preparing image {}", controller.image()))?;

    let block_until_exit = !controller.is_detached() && !args.no_wait;
    let outcome = controller
        .start(StartOptions {
            container_id: args.container_id.clone(),
            block_until_exit,
        })
        .await;

    if !block_until_exit {
        outcome?;
        info!(
            container = %controller.container_id().unwrap_or_default(),
            "container running, waiting for a termination signal"
        );
        // the exit handler stops the container and exits the process
        std::future::pending::<()>().await;
        return Ok(());
    }

    if !args.keep && controller.container_id().is_some() {
        if let Err(err) = controller.remove().await {
            warn!(error = %err, "could not remove container");
        }
    }

    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_parse_run_flags() {
        let harness = Harness::parse_from([
            "dockhand",
            "--image",
            "ubuntu:18.04",
            "-p",
            "8080:80",
            "--stdio",
            "ignore",
            "--",
            "bash",
            "-c",
            "echo ok && true",
        ]);
        let config = harness.run.to_config();

        assert_eq!(config.image.as_deref(), Some("ubuntu:18.04"));
        assert_eq!(config.ports, vec![PortMapping::new("8080", "80")]);
        assert_eq!(config.stdio, Some(StdioMode::Ignore));
        assert_eq!(
            config.command,
            Some(vec![
                "bash".to_string(),
                "-c".to_string(),
                "echo ok && true".to_string()
            ])
        );
        assert_eq!(config.detach, None);
    }

    #[test]
    fn test_rejects_malformed_publish() {
        let parsed = Harness::try_parse_from(["dockhand", "-p", "8080"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_build_src_requires_context() {
        let parsed = Harness::try_parse_from(["dockhand", "--build-src", "Dockerfile"]);
        assert!(parsed.is_err());
    }
}
