mod controller;
mod exit_handler;
mod exit_watcher;
mod image;
mod output;

pub use controller::{
    Controller, ControllerOptions, Phase, STOP_GRACE_PERIOD, StartOptions, StopOptions,
    Termination,
};
pub use exit_handler::{HostProcess, SystemProcess};
pub use exit_watcher::{ExitDetection, POLL_INTERVAL};
pub use output::{OutputSinks, Sink, Stdio};
