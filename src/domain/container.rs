use super::error::DockhandError;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Host address every published port is bound to.
pub const WILDCARD_HOST_IP: &str = "0.0.0.0";

/// A published port: `container_port` inside the container, `host_port` on the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PortMappingInput")]
pub struct PortMapping {
    pub container_port: String,
    pub host_port: String,
}

impl PortMapping {
    pub fn new(container_port: impl ToString, host_port: impl ToString) -> Self {
        Self {
            container_port: container_port.to_string(),
            host_port: host_port.to_string(),
        }
    }

    /// Engine port key, `/tcp` unless the container port names its protocol.
    pub fn port_key(&self) -> String {
        if self.container_port.contains('/') {
            self.container_port.clone()
        } else {
            format!("{}/tcp", self.container_port)
        }
    }
}

impl FromStr for PortMapping {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((container, host))
                if !container.trim().is_empty()
                    && !host.trim().is_empty()
                    && !host.contains(':') =>
            {
                Ok(Self::new(container.trim(), host.trim()))
            }
            _ => Err(DockhandError::InvalidPortMapping(s.to_string())),
        }
    }
}

impl<C: fmt::Display, H: fmt::Display> From<(C, H)> for PortMapping {
    fn from((container, host): (C, H)) -> Self {
        Self::new(container, host)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container_port, self.host_port)
    }
}

/// Either side of a port pair, as it may appear in a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortSide {
    Number(u64),
    Text(String),
}

impl fmt::Display for PortSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortMappingInput {
    Spec(String),
    Pair(PortSide, PortSide),
}

impl TryFrom<PortMappingInput> for PortMapping {
    type Error = DockhandError;

    fn try_from(input: PortMappingInput) -> Result<Self, Self::Error> {
        match input {
            PortMappingInput::Spec(spec) => spec.parse(),
            PortMappingInput::Pair(container, host) => Ok(Self::new(container, host)),
        }
    }
}

/// Sources for building an image instead of pulling it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildContext {
    /// Directory the `src` entries are relative to
    pub context: PathBuf,
    /// Files packaged into the build context
    pub src: Vec<PathBuf>,
    /// Dockerfile name inside the context
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

impl BuildContext {
    pub fn new(context: impl Into<PathBuf>, src: Vec<PathBuf>) -> Self {
        Self {
            context: context.into(),
            src,
            dockerfile: default_dockerfile(),
        }
    }
}

/// Everything needed to create one container, before engine translation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub tty: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub attach_stdin: bool,
    /// Raw fields merged over the generated body
    pub overrides: Map<String, Value>,
}

impl ContainerSpec {
    /// Engine API creation body. Overrides replace generated top-level fields.
    pub fn to_engine_config(&self) -> Value {
        let mut exposed = Map::new();
        let mut bindings = Map::new();
        for port in &self.ports {
            exposed.insert(port.port_key(), json!({}));
            bindings.insert(
                port.port_key(),
                json!([{ "HostIp": WILDCARD_HOST_IP, "HostPort": port.host_port }]),
            );
        }

        let mut body = Map::new();
        body.insert("AttachStdin".into(), json!(self.attach_stdin));
        body.insert("AttachStdout".into(), json!(self.attach_stdout));
        body.insert("AttachStderr".into(), json!(self.attach_stderr));
        body.insert("Tty".into(), json!(self.tty));
        body.insert("OpenStdin".into(), json!(self.attach_stdin));
        body.insert("StdinOnce".into(), json!(false));
        body.insert("Image".into(), json!(self.image));
        body.insert("ExposedPorts".into(), Value::Object(exposed));
        body.insert("HostConfig".into(), json!({ "PortBindings": bindings }));
        if !self.command.is_empty() {
            body.insert("Cmd".into(), json!(self.command));
        }

        for (key, value) in &self.overrides {
            body.insert(key.clone(), value.clone());
        }

        Value::Object(body)
    }
}

/// Runtime-reported container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a container inspection the lifecycle cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub exit_code: i64,
    pub error: Option<String>,
}

impl ContainerState {
    pub fn new(status: ContainerStatus, exit_code: i64) -> Self {
        Self {
            status,
            exit_code,
            error: None,
        }
    }

    pub fn is_clean_exit(&self) -> bool {
        self.status == ContainerStatus::Exited && self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Also remove anonymous volumes
    pub volumes: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    StdOut,
    StdErr,
    /// Combined tty output
    Console,
}

/// One frame read from an attached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: OutputSource,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn console(data: impl Into<Vec<u8>>) -> Self {
        Self {
            source: OutputSource::Console,
            data: data.into(),
        }
    }
}

/// One item of a pull or build progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub status: Option<String>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ports: Vec<PortMapping>, command: Vec<String>) -> ContainerSpec {
        ContainerSpec {
            image: "ubuntu:18.04".to_string(),
            command,
            ports,
            tty: true,
            attach_stdout: true,
            attach_stderr: true,
            attach_stdin: false,
            overrides: Map::new(),
        }
    }

    #[test]
    fn test_port_mapping_from_string() {
        let mapping: PortMapping = "27017:27018".parse().unwrap();
        assert_eq!(mapping.container_port, "27017");
        assert_eq!(mapping.host_port, "27018");
        assert_eq!(mapping.to_string(), "27017:27018");
    }

    #[test]
    fn test_port_mapping_rejects_malformed() {
        assert!("27017".parse::<PortMapping>().is_err());
        assert!(":80".parse::<PortMapping>().is_err());
        assert!("80:".parse::<PortMapping>().is_err());
        assert!("80:8080:9090".parse::<PortMapping>().is_err());
        assert!(matches!(
            "127.0.0.1:80:8080".parse::<PortMapping>(),
            Err(DockhandError::InvalidPortMapping(ref raw)) if raw == "127.0.0.1:80:8080"
        ));
    }

    #[test]
    fn test_port_mapping_from_mixed_pair() {
        let mapping = PortMapping::from((5432, "15432"));
        assert_eq!(mapping, PortMapping::new("5432", "15432"));
    }

    #[test]
    fn test_port_mapping_deserialize_preserves_order() {
        let ports: Vec<PortMapping> =
            serde_json::from_value(json!(["80:8080", [443, "8443"], ["53/udp", 5353]])).unwrap();

        assert_eq!(
            ports,
            vec![
                PortMapping::new("80", "8080"),
                PortMapping::new("443", "8443"),
                PortMapping::new("53/udp", "5353"),
            ]
        );
    }

    #[test]
    fn test_port_key_keeps_explicit_protocol() {
        assert_eq!(PortMapping::new("80", "8080").port_key(), "80/tcp");
        assert_eq!(PortMapping::new("53/udp", "53").port_key(), "53/udp");
    }

    #[test]
    fn test_engine_config_generated_fields() {
        let body = spec(
            vec![PortMapping::new("27017", "27017")],
            vec!["bash".into(), "-c".into(), "true".into()],
        )
        .to_engine_config();

        assert_eq!(body["Tty"], json!(true));
        assert_eq!(body["AttachStdin"], json!(false));
        assert_eq!(body["AttachStdout"], json!(true));
        assert_eq!(body["AttachStderr"], json!(true));
        assert_eq!(body["Image"], json!("ubuntu:18.04"));
        assert_eq!(body["ExposedPorts"], json!({ "27017/tcp": {} }));
        assert_eq!(
            body["HostConfig"]["PortBindings"]["27017/tcp"],
            json!([{ "HostIp": "0.0.0.0", "HostPort": "27017" }])
        );
        assert_eq!(body["Cmd"], json!(["bash", "-c", "true"]));
    }

    #[test]
    fn test_engine_config_omits_empty_command() {
        let body = spec(vec![], vec![]).to_engine_config();
        assert!(body.get("Cmd").is_none());
    }

    #[test]
    fn test_engine_config_overrides_win() {
        let mut spec = spec(vec![PortMapping::new("80", "8080")], vec!["true".into()]);
        spec.overrides.insert("Tty".into(), json!(false));
        spec.overrides.insert("HostConfig".into(), json!({ "Privileged": true }));
        spec.overrides.insert("WorkingDir".into(), json!("/srv"));

        let body = spec.to_engine_config();

        assert_eq!(body["Tty"], json!(false));
        assert_eq!(body["HostConfig"], json!({ "Privileged": true }));
        assert_eq!(body["WorkingDir"], json!("/srv"));
    }

    #[test]
    fn test_clean_exit() {
        assert!(ContainerState::new(ContainerStatus::Exited, 0).is_clean_exit());
        assert!(!ContainerState::new(ContainerStatus::Exited, 1).is_clean_exit());
        assert!(!ContainerState::new(ContainerStatus::Dead, 0).is_clean_exit());
    }
}
