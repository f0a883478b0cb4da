use super::output::SharedSinks;
use crate::domain::{BuildContext, ContainerRuntime, ProgressStream, Result, RuntimeError};
use futures::TryStreamExt;
use tracing::{debug, info};

const PREPARING: &str = "Preparing docker image...\n";
const READY: &str = "Docker image ready\n";

/// Makes sure `image` exists locally, building or pulling it when the runtime reports it missing.
pub(crate) async fn prepare_image(
    runtime: &dyn ContainerRuntime,
    image: &str,
    build: Option<&BuildContext>,
    sinks: &SharedSinks,
) -> Result<()> {
    match runtime.inspect_image(image).await {
        Ok(()) => {
            debug!(image = %image, "image already present");
            return Ok(());
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err.into()),
    }

    sinks.announce(PREPARING).await;

    let progress = match build {
        Some(context) => {
            info!(image = %image, context = ?context.context, "building image");
            runtime.build_image(image, context)?
        }
        None => {
            info!(image = %image, "pulling image");
            runtime.pull_image(image)?
        }
    };
    follow_progress(progress).await?;

    sinks.announce(READY).await;
    info!(image = %image, "image ready");
    Ok(())
}

/// Drives a progress stream to completion; the first error item fails it.
async fn follow_progress(mut progress: ProgressStream<'_>) -> Result<(), RuntimeError> {
    while let Some(event) = progress.try_next().await? {
        match (event.status.as_deref(), event.detail.as_deref()) {
            (Some(status), Some(detail)) => debug!("{} {}", status.trim_end(), detail.trim_end()),
            (Some(line), None) | (None, Some(line)) => debug!("{}", line.trim_end()),
            (None, None) => {}
        }
    }
    Ok(())
}
