use super::exit_watcher::{ContainerCell, ExitDetection, ExitWatcher, TerminationSignal};
use super::image::prepare_image;
use super::output::{SharedSinks, Stdio, pump_output};
use crate::domain::{
    BuildContext, ContainerRuntime, ContainerSpec, DockhandError, PortMapping, RemoveOptions,
    Result,
};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Time a container gets to exit on its own before the runtime kills it.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

const STOP_BEFORE_START: &str = "Cannot stop container before starting it";
const REMOVE_BEFORE_START: &str = "Cannot remove container before starting it";

/// Construction-time configuration of a [`Controller`].
#[derive(Debug)]
pub struct ControllerOptions {
    pub image: String,
    /// Overrides the image's default arguments when non-empty
    pub command: Option<Vec<String>>,
    /// Skip output attachment and never wait for exit
    pub detach: bool,
    pub port_mappings: Vec<PortMapping>,
    pub stdio: Stdio,
    /// Raw engine fields merged last into the creation body
    pub runtime_config: Map<String, Value>,
    /// Defaults to [`ExitDetection::for_host`]
    pub exit_detection: Option<ExitDetection>,
}

impl ControllerOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            detach: false,
            port_mappings: Vec::new(),
            stdio: Stdio::Ignore,
            runtime_config: Map::new(),
            exit_detection: None,
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_port(mut self, mapping: impl Into<PortMapping>) -> Self {
        self.port_mappings.push(mapping.into());
        self
    }

    pub fn with_stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }

    pub fn with_runtime_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.runtime_config.insert(key.into(), value);
        self
    }

    pub fn with_exit_detection(mut self, detection: ExitDetection) -> Self {
        self.exit_detection = Some(detection);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Adopt this existing container instead of creating one
    pub container_id: Option<String>,
    /// Wait for the container to exit and report how it went
    pub block_until_exit: bool,
}

impl StartOptions {
    pub fn blocking() -> Self {
        Self {
            container_id: None,
            block_until_exit: true,
        }
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            container_id: Some(id.into()),
            block_until_exit: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    pub auto_remove: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self { auto_remove: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Failure { exit_code: i64 },
    Stopped,
}

/// Where the managed container is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Created,
    Attaching,
    Running,
    Terminated(Termination),
    Removed,
}

/// Sub-resources that live between `start` and `remove`.
struct Transient {
    sinks: SharedSinks,
    stream: Option<JoinHandle<()>>,
    finished: Option<TerminationSignal>,
    phase: Phase,
}

/// Owns one container from image preparation to removal.
///
/// Calls may be shared through an `Arc` (the exit handler does), but
/// overlapping `start`/`stop`/`remove` calls must be serialized by the caller.
pub struct Controller {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    command: Option<Vec<String>>,
    detach: bool,
    port_mappings: Vec<PortMapping>,
    runtime_config: Map<String, Value>,
    exit_detection: ExitDetection,
    container: ContainerCell,
    transient: Mutex<Transient>,
}

impl Controller {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: ControllerOptions) -> Self {
        let sinks = if options.detach {
            SharedSinks::default()
        } else {
            SharedSinks::from(options.stdio)
        };

        Self {
            runtime,
            image: options.image,
            command: options.command,
            detach: options.detach,
            port_mappings: options.port_mappings,
            runtime_config: options.runtime_config,
            exit_detection: options.exit_detection.unwrap_or_else(ExitDetection::for_host),
            container: ContainerCell::default(),
            transient: Mutex::new(Transient {
                sinks,
                stream: None,
                finished: None,
                phase: Phase::NotStarted,
            }),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn port_mappings(&self) -> &[PortMapping] {
        &self.port_mappings
    }

    pub fn is_detached(&self) -> bool {
        self.detach
    }

    pub fn exit_detection(&self) -> ExitDetection {
        self.exit_detection
    }

    /// Id of the managed container, if one was created or adopted.
    pub fn container_id(&self) -> Option<String> {
        self.container.get()
    }

    /// Last completed lifecycle step. A failed attach or start falls back to
    /// [`Phase::Created`]; a watcher that could not observe the exit leaves it untouched.
    pub fn phase(&self) -> Phase {
        self.transient().phase
    }

    /// Whether an output stream is still held.
    pub fn is_streaming(&self) -> bool {
        self.transient().stream.is_some()
    }

    pub fn has_output_sinks(&self) -> bool {
        !self.transient().sinks.is_empty()
    }

    fn transient(&self) -> MutexGuard<'_, Transient> {
        self.transient.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        self.transient().phase = phase;
    }

    /// Makes sure the image exists, building from `build` or pulling when it does not.
    pub async fn setup(&self, build: Option<&BuildContext>) -> Result<()> {
        let sinks = self.transient().sinks.clone();
        prepare_image(self.runtime.as_ref(), &self.image, build, &sinks).await
    }

    /// Creation request for this controller's container.
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            command: self.command.clone().unwrap_or_default(),
            ports: self.port_mappings.clone(),
            tty: true,
            attach_stdout: true,
            attach_stderr: true,
            attach_stdin: false,
            overrides: self.runtime_config.clone(),
        }
    }

    /// Creates a new container without starting it. The caller keeps the id.
    pub async fn create_container(&self) -> Result<String> {
        let id = self.runtime.create_container(&self.container_spec()).await?;
        info!(container = %id, image = %self.image, "created container");
        Ok(id)
    }

    pub async fn start(&self, options: StartOptions) -> Result<()> {
        let id = match options.container_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.runtime.inspect_container(&id).await?;
                debug!(container = %id, "adopting existing container");
                self.adopt(id.clone());
                id
            }
            None => match self.container.get() {
                Some(id) => id,
                None => {
                    let id = self.create_container().await?;
                    self.adopt(id.clone());
                    id
                }
            },
        };

        // attach first so no early output or exit is missed
        if !self.detach {
            self.attach_container_stream(&id, options.block_until_exit)
                .await?;
        }

        let finished = if options.block_until_exit {
            self.transient().finished.take()
        } else {
            None
        };

        if let Err(err) = self.runtime.start_container(&id).await {
            self.set_phase(Phase::Created);
            return Err(err.into());
        }
        self.set_phase(Phase::Running);
        info!(container = %id, "container started");

        let Some(finished) = finished else {
            return Ok(());
        };

        let outcome = finished.await.unwrap_or(Err(DockhandError::WatcherLost));
        match &outcome {
            Ok(()) => self.set_phase(Phase::Terminated(Termination::Success)),
            Err(DockhandError::Execution(err)) => self.set_phase(Phase::Terminated(
                Termination::Failure {
                    exit_code: err.exit_code,
                },
            )),
            // removal already moved the phase on; runtime failures say nothing about the exit
            Err(_) => {}
        }
        outcome
    }

    fn adopt(&self, id: String) {
        self.container.set(id);
        self.set_phase(Phase::Created);
    }

    async fn attach_container_stream(&self, id: &str, block_until_exit: bool) -> Result<()> {
        self.set_phase(Phase::Attaching);
        let stream = match self.runtime.attach_container(id).await {
            Ok(stream) => stream,
            Err(err) => {
                self.set_phase(Phase::Created);
                return Err(err.into());
            }
        };
        let sinks = self.transient().sinks.clone();

        let task = if block_until_exit {
            let (watcher, finished) = ExitWatcher::new(
                self.runtime.clone(),
                self.container.clone(),
                sinks.has_stdout(),
                self.exit_detection,
            );
            self.transient().finished = Some(finished);
            tokio::spawn(watcher.watch(stream, sinks))
        } else {
            tokio::spawn(pump_output(stream, sinks))
        };

        if let Some(previous) = self.transient().stream.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn stop(&self, options: StopOptions) -> Result<()> {
        let id = self
            .container
            .get()
            .ok_or(DockhandError::Usage(STOP_BEFORE_START))?;

        info!(container = %id, "stopping container");
        match self.runtime.stop_container(&id, STOP_GRACE_PERIOD).await {
            Ok(()) => {}
            Err(err) if err.is_benign_stop() => {
                debug!(container = %id, error = %err, "container already stopped");
            }
            Err(err) => return Err(err.into()),
        }
        self.set_phase(Phase::Terminated(Termination::Stopped));

        if options.auto_remove {
            self.remove().await?;
        }
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        let id = self
            .container
            .get()
            .ok_or(DockhandError::Usage(REMOVE_BEFORE_START))?;

        let options = RemoveOptions {
            volumes: true,
            force: true,
        };
        match self.runtime.remove_container(&id, options).await {
            Ok(()) => info!(container = %id, "removed container"),
            Err(err) if err.is_benign_remove() => {
                debug!(container = %id, error = %err, "container already removed");
            }
            Err(err) => return Err(err.into()),
        }

        self.release();
        Ok(())
    }

    /// Drops every transient resource; the stream goes no later than the handle.
    fn release(&self) {
        let mut transient = self.transient();
        if let Some(stream) = transient.stream.take() {
            stream.abort();
        }
        transient.finished = None;
        transient.sinks.clear();
        transient.phase = Phase::Removed;
        drop(transient);
        self.container.clear();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(stream) = self.transient().stream.take() {
            stream.abort();
        }
    }
}
