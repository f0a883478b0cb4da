use crate::domain::{OutputSource, OutputStream};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A caller-supplied destination for container output.
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

type SharedSink = Arc<Mutex<Sink>>;

/// Destinations for container stdout/stderr.
#[derive(Default)]
pub struct OutputSinks {
    pub stdout: Option<Sink>,
    pub stderr: Option<Sink>,
}

impl OutputSinks {
    pub fn new(stdout: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            stdout: Some(Box::new(stdout)),
            stderr: None,
        }
    }

    pub fn with_stderr(mut self, stderr: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(stderr));
        self
    }

    /// The stdout/stderr handles of the current process.
    pub fn host() -> Self {
        Self::new(tokio::io::stdout()).with_stderr(tokio::io::stderr())
    }
}

impl fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSinks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Output configuration, decided once when the controller is built.
#[derive(Debug, Default)]
pub enum Stdio {
    #[default]
    Ignore,
    Piped(OutputSinks),
}

impl Stdio {
    /// Forward output to the host process stdout/stderr.
    pub fn inherit() -> Self {
        Self::Piped(OutputSinks::host())
    }
}

/// Sinks shared between the controller and the output pump.
#[derive(Clone, Default)]
pub(crate) struct SharedSinks {
    stdout: Option<SharedSink>,
    stderr: Option<SharedSink>,
}

impl From<Stdio> for SharedSinks {
    fn from(stdio: Stdio) -> Self {
        match stdio {
            Stdio::Ignore => Self::default(),
            Stdio::Piped(sinks) => Self {
                stdout: sinks.stdout.map(|s| Arc::new(Mutex::new(s))),
                stderr: sinks.stderr.map(|s| Arc::new(Mutex::new(s))),
            },
        }
    }
}

impl SharedSinks {
    pub(crate) fn has_stdout(&self) -> bool {
        self.stdout.is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }

    /// Writes a progress marker to stdout, if there is one.
    pub(crate) async fn announce(&self, message: &str) {
        let Some(sink) = &self.stdout else {
            return;
        };
        if let Err(err) = write_to(sink, message.as_bytes()).await {
            debug!(error = %err, "could not write progress marker");
        }
    }

    fn target(&self, source: OutputSource) -> Option<SharedSink> {
        match source {
            OutputSource::StdErr => self.stderr.as_ref().or(self.stdout.as_ref()).cloned(),
            OutputSource::StdOut | OutputSource::Console => self.stdout.clone(),
        }
    }

    fn forget(&mut self, sink: &SharedSink) {
        if self.stdout.as_ref().is_some_and(|s| Arc::ptr_eq(s, sink)) {
            self.stdout = None;
        }
        if self.stderr.as_ref().is_some_and(|s| Arc::ptr_eq(s, sink)) {
            self.stderr = None;
        }
    }
}

async fn write_to(sink: &SharedSink, data: &[u8]) -> std::io::Result<()> {
    let mut sink = sink.lock().await;
    sink.write_all(data).await?;
    sink.flush().await
}

/// Copies container output into the sinks until the stream ends.
/// Output without a sink is drained so the connection never stalls.
pub(crate) async fn pump_output(mut stream: OutputStream, mut sinks: SharedSinks) {
    while let Some(frame) = stream.next().await {
        let chunk = match frame {
            Ok(chunk) => chunk,
            Err(err) => {
                debug!(error = %err, "container output stream failed");
                break;
            }
        };

        let Some(sink) = sinks.target(chunk.source) else {
            continue;
        };

        if let Err(err) = write_to(&sink, &chunk.data).await {
            warn!(error = %err, "output sink failed, discarding further output for it");
            sinks.forget(&sink);
        }
    }
}
