use crate::domain::{
    BuildContext, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, OutputChunk,
    OutputStream, ProgressEvent, ProgressStream, RemoveOptions, RuntimeError,
};
use crate::services::HostProcess;
use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::{StreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// What a container does once started: print, wait, then exit.
#[derive(Debug, Clone, Default)]
pub struct RunScript {
    pub output: Vec<String>,
    pub exit_code: i64,
    pub error: Option<String>,
    /// Time spent running before the output is emitted and the container exits
    pub delay: Duration,
}

impl RunScript {
    pub fn exits_with(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn printing(mut self, line: &str) -> Self {
        self.output.push(line.to_string());
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub spec: Option<ContainerSpec>,
    pub state: ContainerState,
    script: Option<RunScript>,
}

#[derive(Debug, Default)]
struct MockState {
    images: HashSet<String>,
    containers: HashMap<String, MockContainer>,
    attachments: HashMap<String, Vec<UnboundedSender<OutputChunk>>>,
    commands: Vec<String>,
    failures: HashMap<String, u16>,
    script: Option<RunScript>,
    next_id: u64,
}

impl MockState {
    fn record_command(&mut self, cmd: String) {
        self.commands.push(cmd);
    }

    fn check_fail(&self, operation: &str) -> Result<(), RuntimeError> {
        match self.failures.get(operation) {
            Some(code) => Err(RuntimeError::api(
                *code,
                format!("Mock failure on: {operation}"),
            )),
            None => Ok(()),
        }
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MockContainer, RuntimeError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::api(404, format!("No such container: {id}")))
    }

    /// Emits the script output, marks the container exited and ends its streams.
    fn finish(&mut self, id: &str, script: &RunScript) {
        let Some(container) = self.containers.get_mut(id) else {
            return;
        };
        if container.state.status != ContainerStatus::Running {
            return;
        }
        container.state = ContainerState {
            status: ContainerStatus::Exited,
            exit_code: script.exit_code,
            error: script.error.clone(),
        };

        for sender in self.attachments.remove(id).unwrap_or_default() {
            for line in &script.output {
                let _ = sender.unbounded_send(OutputChunk::console(line.as_bytes()));
            }
        }
    }

    fn close_attachments(&mut self, id: &str) {
        self.attachments.remove(id);
    }
}

/// In-memory runtime with scripted containers, recording every call.
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    state: Arc<RwLock<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: &str) {
        self.state.write().unwrap().images.insert(image.to_string());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.read().unwrap().images.contains(image)
    }

    pub fn add_container(&self, id: &str, status: ContainerStatus) {
        self.state.write().unwrap().containers.insert(
            id.to_string(),
            MockContainer {
                id: id.to_string(),
                spec: None,
                state: ContainerState::new(status, 0),
                script: None,
            },
        );
    }

    /// Script applied to containers created from now on.
    pub fn set_run_script(&self, script: RunScript) {
        self.state.write().unwrap().script = Some(script);
    }

    /// Makes `operation` fail with a 500.
    pub fn set_fail_on(&self, operation: &str) {
        self.set_fail_status(operation, 500);
    }

    pub fn set_fail_status(&self, operation: &str, status_code: u16) {
        self.state
            .write()
            .unwrap()
            .failures
            .insert(operation.to_string(), status_code);
    }

    pub fn clear_failures(&self) {
        self.state.write().unwrap().failures.clear();
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.state.read().unwrap().commands.clone()
    }

    /// Number of recorded calls to `operation` (e.g. `"pull"`).
    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.state
            .read()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.state.read().unwrap().containers.contains_key(id)
    }

    pub fn get_status(&self, id: &str) -> Option<ContainerStatus> {
        self.state
            .read()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.state.status)
    }

    pub fn get_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.state
            .read()
            .unwrap()
            .containers
            .get(id)
            .and_then(|c| c.spec.clone())
    }

    /// Number of output streams still open for a container.
    pub fn open_attachments(&self, id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .attachments
            .get(id)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Simulates a running container exiting on its own.
    pub fn exit_container(&self, id: &str, exit_code: i64) {
        let script = RunScript::exits_with(exit_code);
        self.state.write().unwrap().finish(id, &script);
    }

    fn progress(events: Vec<Result<ProgressEvent, RuntimeError>>) -> ProgressStream<'static> {
        stream::iter(events).boxed()
    }

    fn progress_line(status: &str) -> Result<ProgressEvent, RuntimeError> {
        Ok(ProgressEvent {
            status: Some(status.to_string()),
            detail: None,
        })
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("inspect_image:{image}"));
        state.check_fail("inspect_image")?;

        if state.images.contains(image) {
            Ok(())
        } else {
            Err(RuntimeError::api(404, format!("No such image: {image}")))
        }
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> Result<ProgressStream<'a>, RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("pull:{image}"));
        state.check_fail("pull")?;

        if state.check_fail("pull_progress").is_err() {
            return Ok(Self::progress(vec![
                Self::progress_line("Pulling fs layer"),
                Err(RuntimeError::Progress(format!("manifest for {image} not found"))),
            ]));
        }

        state.images.insert(image.to_string());
        Ok(Self::progress(vec![
            Self::progress_line("Pulling fs layer"),
            Self::progress_line(&format!("Status: Downloaded newer image for {image}")),
        ]))
    }

    fn build_image<'a>(
        &'a self,
        tag: &'a str,
        _context: &'a BuildContext,
    ) -> Result<ProgressStream<'a>, RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("build:{tag}"));
        state.check_fail("build")?;

        state.images.insert(tag.to_string());
        Ok(Self::progress(vec![
            Self::progress_line("Step 1/1 : FROM ubuntu:18.04"),
            Self::progress_line(&format!("Successfully tagged {tag}")),
        ]))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("create:{}", spec.image));
        state.check_fail("create")?;

        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        let script = state.script.clone();
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                spec: Some(spec.clone()),
                state: ContainerState::new(ContainerStatus::Created, 0),
                script,
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("inspect:{id}"));
        state.check_fail("inspect")?;

        Ok(state.container_mut(id)?.state.clone())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let script = {
            let mut state = self.state.write().unwrap();
            state.record_command(format!("start:{id}"));
            state.check_fail("start")?;

            let container = state.container_mut(id)?;
            if container.state.status == ContainerStatus::Running {
                return Err(RuntimeError::api(304, "container already started"));
            }
            container.state = ContainerState::new(ContainerStatus::Running, 0);
            let script = container.script.clone();

            match script {
                Some(script) if script.delay.is_zero() => {
                    state.finish(id, &script);
                    return Ok(());
                }
                other => other,
            }
        };

        if let Some(script) = script {
            let shared = self.state.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(script.delay).await;
                shared.write().unwrap().finish(&id, &script);
            });
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_period: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("stop:{id}:{}", grace_period.as_secs()));
        state.check_fail("stop")?;

        let container = state.container_mut(id)?;
        if container.state.status != ContainerStatus::Running {
            return Err(RuntimeError::api(304, "container already stopped"));
        }
        container.state = ContainerState::new(ContainerStatus::Exited, 0);
        state.close_attachments(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!(
            "remove:{id}:volumes={}:force={}",
            options.volumes, options.force
        ));
        state.check_fail("remove")?;

        let running = state.container_mut(id)?.state.status == ContainerStatus::Running;
        if running && !options.force {
            return Err(RuntimeError::api(409, "cannot remove a running container"));
        }
        state.containers.remove(id);
        state.close_attachments(id);
        Ok(())
    }

    async fn attach_container(&self, id: &str) -> Result<OutputStream, RuntimeError> {
        let mut state = self.state.write().unwrap();
        state.record_command(format!("attach:{id}"));
        state.check_fail("attach")?;
        state.container_mut(id)?;

        let (sender, receiver) = unbounded();
        state
            .attachments
            .entry(id.to_string())
            .or_default()
            .push(sender);
        Ok(receiver.map(Ok).boxed())
    }
}

/// Async writer collecting everything written to it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Async writer whose every write fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenSink;

impl AsyncWrite for BrokenSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Host process whose termination is triggered by the test.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    terminate: Arc<Notify>,
    exited: Arc<Notify>,
    exit_codes: Arc<Mutex<Vec<i32>>>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a termination request (as SIGINT/SIGTERM would).
    pub fn send_terminate(&self) {
        self.terminate.notify_one();
    }

    pub async fn wait_for_exit(&self) {
        self.exited.notified().await;
    }

    pub fn exit_codes(&self) -> Vec<i32> {
        self.exit_codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostProcess for MockProcess {
    async fn terminated(&self) -> io::Result<()> {
        self.terminate.notified().await;
        Ok(())
    }

    fn exit(&self, code: i32) {
        self.exit_codes.lock().unwrap().push(code);
        self.exited.notify_one();
    }
}
