use thiserror::Error;

pub type Result<T, E = DockhandError> = std::result::Result<T, E>;

const NOT_MODIFIED: u16 = 304;
const NOT_FOUND: u16 = 404;
const CONFLICT: u16 = 409;

/// Failure reported by the container runtime client.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime responded with status {status_code}: {message}")]
    Api { status_code: u16, message: String },

    #[error("progress stream failed: {0}")]
    Progress(String),

    #[error("could not reach the container runtime: {0}")]
    Transport(String),

    #[error("failed to package build context")]
    Context(#[source] std::io::Error),

    #[error("invalid container configuration: {0}")]
    InvalidConfig(String),
}

impl RuntimeError {
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(NOT_FOUND)
    }

    /// Stop raced a container that is already stopped or busy.
    pub fn is_benign_stop(&self) -> bool {
        matches!(self.status_code(), Some(NOT_MODIFIED | CONFLICT))
    }

    /// Remove raced a container that is already gone or being removed.
    pub fn is_benign_remove(&self) -> bool {
        matches!(self.status_code(), Some(NOT_MODIFIED | NOT_FOUND | CONFLICT))
    }
}

/// A container that ran and did not exit cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (exit code {exit_code})")]
pub struct ExecutionError {
    pub message: String,
    pub exit_code: i64,
}

#[derive(Debug, Error)]
pub enum DockhandError {
    #[error("{0}")]
    Usage(&'static str),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("container was removed before its exit could be observed")]
    WatcherLost,

    #[error("invalid port mapping `{0}`, expected CONTAINER:HOST")]
    InvalidPortMapping(String),
}

impl DockhandError {
    /// Exit code carried by an execution failure.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::Execution(err) => Some(err.exit_code),
            _ => None,
        }
    }
}
