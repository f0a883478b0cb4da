use super::run::ImageArgs;
use crate::infra::DockerAdapter;
use crate::infra::config::{AppConfig, StdioMode, load_optional_config};
use crate::services::Controller;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Where pull/build progress goes
    #[arg(long, value_enum)]
    pub stdio: Option<StdioMode>,
}

impl SetupArgs {
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            stdio: self.stdio,
            ..self.image.to_config()
        }
    }
}

/// Pulls or builds the configured image without creating a container.
pub async fn install(args: SetupArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_optional_config(config_path)?;
    config.merge(args.to_config());
    let build = config.build_context();
    let options = config.into_options()?;

    let runtime = Arc::new(DockerAdapter::new().context("connecting to docker")?);
    let controller = Controller::new(runtime, options);

    controller
        .setup(build.as_ref())
        .await
        .with_context(|| format!("preparing image {}", controller.image()))?;

    info!(image = controller.image(), "image available");
    Ok(())
}
