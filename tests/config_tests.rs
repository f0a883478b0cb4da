use anyhow::Result;
use dockhand::infra::config::{DEFAULT_CONFIG_FILE, load_app_config, load_optional_config};
use dockhand::services::{Controller, StartOptions};
use dockhand::test_support::MockRuntime;
use std::fs;
use std::sync::Arc;

#[tokio::test]
async fn test_config_file_drives_controller() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
    fs::write(
        &path,
        r#"
image = "mongo:4.0.6"
command = ["mongod", "--bind_ip_all"]
ports = ["27017:27017"]
stdio = "ignore"

[runtime_config.HostConfig]
Memory = 268435456
"#,
    )?;

    let config = load_optional_config(Some(&path))?;
    assert!(config.build_context().is_none());

    let mock = Arc::new(MockRuntime::new());
    let ctrl = Controller::new(mock.clone(), config.into_options()?);
    assert!(!ctrl.has_output_sinks());

    ctrl.setup(None).await?;
    ctrl.start(StartOptions::default()).await?;

    let id = ctrl.container_id().unwrap();
    let body = mock.get_spec(&id).unwrap().to_engine_config();
    assert_eq!(body["Image"], "mongo:4.0.6");
    assert_eq!(body["Cmd"][0], "mongod");
    // runtime_config replaces the generated HostConfig wholesale
    assert_eq!(body["HostConfig"]["Memory"], 268435456);
    assert!(body["HostConfig"].get("PortBindings").is_none());
    assert!(body["ExposedPorts"].get("27017/tcp").is_some());
    Ok(())
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("absent.toml");

    assert!(load_app_config(&path).is_err());
    assert!(load_optional_config(Some(&path)).is_err());
}

#[test]
fn test_inherit_is_default_stdio() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
    fs::write(&path, "image = \"ubuntu:18.04\"\n")?;

    let options = load_app_config(&path)?.into_options()?;
    assert!(matches!(options.stdio, dockhand::services::Stdio::Piped(_)));
    Ok(())
}
