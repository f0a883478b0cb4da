//! Termination detection for attached containers.
//!
//! End-of-stream notification is not delivered reliably on every host when the
//! output is tty-attached, so there are two strategies. Both settle the same
//! single-use signal through [`classify`].

use super::output::{SharedSinks, pump_output};
use crate::domain::{
    ContainerRuntime, ContainerState, ContainerStatus, DockhandError, ExecutionError, OutputStream,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const EXECUTION_ERROR: &str = "Execution error.";
const CAPTURE_HINT: &str = " If you need more details, enable container stdout.";

pub(crate) type TerminationSender = oneshot::Sender<Result<(), DockhandError>>;
pub(crate) type TerminationSignal = oneshot::Receiver<Result<(), DockhandError>>;

/// How a blocking start learns that its container exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDetection {
    /// Inspect the container once its output stream ends
    EndOfStream,
    /// Inspect the container every [`POLL_INTERVAL`] until it leaves `running`
    Polling,
}

impl ExitDetection {
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::Polling
        } else {
            Self::EndOfStream
        }
    }
}

/// Id of the managed container, shared with running watchers.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContainerCell(Arc<Mutex<Option<String>>>);

impl ContainerCell {
    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set(&self, id: String) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Success only for a clean `exited` with code 0.
pub(crate) fn classify(state: &ContainerState, output_captured: bool) -> Result<(), ExecutionError> {
    if state.is_clean_exit() {
        return Ok(());
    }

    let message = match &state.error {
        Some(error) => error.clone(),
        None if output_captured => EXECUTION_ERROR.to_string(),
        None => format!("{EXECUTION_ERROR}{CAPTURE_HINT}"),
    };

    Err(ExecutionError {
        message,
        exit_code: state.exit_code,
    })
}

pub(crate) struct ExitWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerCell,
    output_captured: bool,
    signal: TerminationSender,
    detection: ExitDetection,
}

impl ExitWatcher {
    pub(crate) fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container: ContainerCell,
        output_captured: bool,
        detection: ExitDetection,
    ) -> (Self, TerminationSignal) {
        let (signal, finished) = oneshot::channel();
        let watcher = Self {
            runtime,
            container,
            output_captured,
            signal,
            detection,
        };
        (watcher, finished)
    }

    /// Pumps output into the sinks and settles the signal once the container exits.
    pub(crate) async fn watch(self, stream: OutputStream, sinks: SharedSinks) {
        match self.detection {
            ExitDetection::EndOfStream => {
                pump_output(stream, sinks).await;
                self.on_stream_end().await;
            }
            ExitDetection::Polling => {
                let pump = pump_output(stream, sinks);
                let poll = self.poll();
                tokio::pin!(pump);
                tokio::pin!(poll);

                // a settled poll drops the pump, destroying the stream
                tokio::select! {
                    _ = &mut poll => {}
                    _ = &mut pump => poll.await,
                }
            }
        }
    }

    async fn on_stream_end(self) {
        let Some(id) = self.container.get() else {
            debug!("container removed before its output ended");
            return;
        };

        let outcome = match self.runtime.inspect_container(&id).await {
            Ok(state) => classify(&state, self.output_captured).map_err(DockhandError::from),
            Err(err) => Err(err.into()),
        };
        self.settle(outcome);
    }

    async fn poll(self) {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let Some(id) = self.container.get() else {
                debug!("container removed while polling for exit");
                return;
            };

            match self.runtime.inspect_container(&id).await {
                Ok(state) if state.status == ContainerStatus::Running => continue,
                Ok(state) => {
                    let outcome = classify(&state, self.output_captured);
                    return self.settle(outcome.map_err(DockhandError::from));
                }
                Err(err) => return self.settle(Err(err.into())),
            }
        }
    }

    fn settle(self, outcome: Result<(), DockhandError>) {
        debug!(success = outcome.is_ok(), "container exit observed");
        // nobody waiting is fine: start may have failed before blocking
        let _ = self.signal.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_exit_is_success() {
        let state = ContainerState::new(ContainerStatus::Exited, 0);
        assert!(classify(&state, false).is_ok());
    }

    #[test]
    fn test_nonzero_exit_carries_code_and_hint() {
        let state = ContainerState::new(ContainerStatus::Exited, 1);
        let err = classify(&state, false).unwrap_err();

        assert_eq!(err.exit_code, 1);
        assert_eq!(
            err.message,
            "Execution error. If you need more details, enable container stdout."
        );
    }

    #[test]
    fn test_no_hint_when_output_captured() {
        let state = ContainerState::new(ContainerStatus::Exited, 2);
        let err = classify(&state, true).unwrap_err();
        assert_eq!(err.message, "Execution error.");
    }

    #[test]
    fn test_runtime_error_message_wins() {
        let state = ContainerState {
            status: ContainerStatus::Dead,
            exit_code: 127,
            error: Some("exec: \"nope\": executable file not found".to_string()),
        };
        let err = classify(&state, false).unwrap_err();

        assert_eq!(err.exit_code, 127);
        assert!(err.message.starts_with("exec:"));
    }

    #[test]
    fn test_non_exited_status_is_failure() {
        let state = ContainerState::new(ContainerStatus::Running, 0);
        assert!(classify(&state, true).is_err());
    }

    #[test]
    fn test_container_cell() {
        let cell = ContainerCell::default();
        let shared = cell.clone();
        cell.set("abc".into());
        assert_eq!(shared.get().as_deref(), Some("abc"));
        shared.clear();
        assert_eq!(cell.get(), None);
    }
}
