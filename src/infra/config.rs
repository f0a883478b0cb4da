use crate::domain::{BuildContext, PortMapping};
use crate::services::{ControllerOptions, Stdio};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "dockhand.toml";

/// Where container output goes when driven from the command line.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    #[default]
    Inherit,
    Ignore,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub context: Option<PathBuf>,
    #[serde(default)]
    pub src: Vec<PathBuf>,
    pub dockerfile: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub detach: Option<bool>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    pub stdio: Option<StdioMode>,
    #[serde(default)]
    pub build: BuildConfig,
    /// Raw engine fields merged over the generated container body
    #[serde(default)]
    pub runtime_config: Map<String, Value>,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: AppConfig) {
        if let Some(image) = other.image {
            self.image = Some(image);
        }
        if let Some(command) = other.command {
            self.command = Some(command);
        }
        if let Some(detach) = other.detach {
            self.detach = Some(detach);
        }
        if !other.ports.is_empty() {
            self.ports = other.ports;
        }
        if let Some(stdio) = other.stdio {
            self.stdio = Some(stdio);
        }
        if let Some(context) = other.build.context {
            self.build.context = Some(context);
        }
        if !other.build.src.is_empty() {
            self.build.src = other.build.src;
        }
        if let Some(dockerfile) = other.build.dockerfile {
            self.build.dockerfile = Some(dockerfile);
        }
        for (key, value) in other.runtime_config {
            self.runtime_config.insert(key, value);
        }
    }

    /// Build context, present only when a context directory is configured.
    pub fn build_context(&self) -> Option<BuildContext> {
        let context = self.build.context.clone()?;
        let src = if self.build.src.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.build.src.clone()
        };

        let mut build = BuildContext::new(expand_path(&context), src);
        if let Some(dockerfile) = &self.build.dockerfile {
            build.dockerfile = dockerfile.clone();
        }
        Some(build)
    }

    pub fn into_options(self) -> Result<ControllerOptions> {
        let Some(image) = self.image.filter(|i| !i.trim().is_empty()) else {
            bail!("No image configured. Pass --image or set `image` in {DEFAULT_CONFIG_FILE}");
        };

        let stdio = match self.stdio.unwrap_or_default() {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Ignore => Stdio::Ignore,
        };

        let mut options = ControllerOptions::new(image);
        options.command = self.command;
        options.detach = self.detach.unwrap_or(false);
        options.port_mappings = self.ports;
        options.stdio = stdio;
        options.runtime_config = self.runtime_config;
        Ok(options)
    }
}

/// Expands `~` and environment variables in a configured path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

pub fn load_app_config(path: &Path) -> Result<AppConfig> {
    let path = expand_path(path);
    let content = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
    let config = parse_app_config(&content).with_context(|| format!("parsing {:?}", path))?;
    debug!(path = ?path, "loaded config");
    Ok(config)
}

/// Loads the config file if present; a missing default file is not an error.
pub fn load_optional_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => load_app_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load_app_config(default)
            } else {
                Ok(AppConfig::default())
            }
        }
    }
}

pub fn parse_app_config(content: &str) -> Result<AppConfig> {
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    Ok(toml::from_str(content)?)
}
