use super::{
    BuildContext, ContainerSpec, ContainerState, OutputChunk, ProgressEvent, RemoveOptions,
    RuntimeError,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;
use std::time::Duration;

/// Pull or build progress, finished when the stream ends.
pub type ProgressStream<'a> = BoxStream<'a, Result<ProgressEvent, RuntimeError>>;

/// Output of an attached container, ends when the container closes it.
pub type OutputStream = BoxStream<'static, Result<OutputChunk, RuntimeError>>;

/// Trait for container runtime operations
#[async_trait]
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Check that an image is present locally
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Pull an image from its registry
    fn pull_image<'a>(&'a self, image: &'a str) -> Result<ProgressStream<'a>, RuntimeError>;

    /// Build an image from local sources and tag it
    fn build_image<'a>(
        &'a self,
        tag: &'a str,
        context: &'a BuildContext,
    ) -> Result<ProgressStream<'a>, RuntimeError>;

    /// Create a container without starting it, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Get the current state of a container
    async fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError>;

    /// Start a created or stopped container
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container, killing it once the grace period runs out
    async fn stop_container(&self, id: &str, grace_period: Duration) -> Result<(), RuntimeError>;

    /// Remove a container
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError>;

    /// Attach to the combined stdout/stderr of a container
    async fn attach_container(&self, id: &str) -> Result<OutputStream, RuntimeError>;
}
