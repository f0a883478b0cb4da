mod container;
mod error;
pub mod traits;

pub use container::{
    BuildContext, ContainerSpec, ContainerState, ContainerStatus, OutputChunk, OutputSource,
    PortMapping, ProgressEvent, RemoveOptions, WILDCARD_HOST_IP,
};
pub use error::{DockhandError, ExecutionError, Result, RuntimeError};
pub use traits::{ContainerRuntime, OutputStream, ProgressStream};
