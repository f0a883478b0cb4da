use super::controller::{Controller, StopOptions};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The host process as seen by the exit handler.
#[async_trait]
pub trait HostProcess: Send + Sync + 'static {
    /// Resolves once the process has been asked to terminate.
    async fn terminated(&self) -> io::Result<()>;

    fn exit(&self, code: i32);
}

/// SIGINT/SIGTERM (Ctrl-C elsewhere) and `std::process::exit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

#[async_trait]
impl HostProcess for SystemProcess {
    async fn terminated(&self) -> io::Result<()> {
        wait_for_termination().await
    }

    fn exit(&self, code: i32) {
        std::process::exit(code)
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

impl Controller {
    /// Stops (and removes) the container when `process` is told to terminate,
    /// then exits it. Never installed implicitly.
    pub fn load_exit_handler<P: HostProcess>(self: &Arc<Self>, process: P) -> JoinHandle<()> {
        let controller = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(err) = process.terminated().await {
                error!(error = %err, "could not listen for termination signals");
                return;
            }

            info!("termination requested, stopping container");
            let code = match controller.stop(StopOptions::default()).await {
                Ok(()) => 0,
                Err(err) => {
                    error!(error = %err, "failed to stop container on exit");
                    1
                }
            };
            process.exit(code);
        })
    }
}
