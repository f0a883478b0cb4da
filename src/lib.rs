pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
pub mod test_support;

pub use domain::{
    BuildContext, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus,
    DockhandError, ExecutionError, PortMapping, RuntimeError,
};
pub use infra::DockerAdapter;
pub use services::{
    Controller, ControllerOptions, ExitDetection, OutputSinks, Phase, StartOptions, Stdio,
    StopOptions,
};
