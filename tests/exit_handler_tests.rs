use dockhand::domain::ContainerStatus;
use dockhand::services::{Controller, ControllerOptions, ExitDetection, StartOptions};
use dockhand::test_support::{MockProcess, MockRuntime};
use std::sync::Arc;

fn controller(mock: &Arc<MockRuntime>) -> Arc<Controller> {
    Arc::new(Controller::new(
        mock.clone(),
        ControllerOptions::new("mongo:4.0.6").with_exit_detection(ExitDetection::EndOfStream),
    ))
}

#[tokio::test]
async fn test_termination_stops_and_removes() {
    let mock = Arc::new(MockRuntime::new());
    let ctrl = controller(&mock);
    let process = MockProcess::new();

    ctrl.start(StartOptions::default()).await.unwrap();
    let id = ctrl.container_id().unwrap();
    assert_eq!(mock.get_status(&id), Some(ContainerStatus::Running));

    let handler = ctrl.load_exit_handler(process.clone());
    process.send_terminate();
    process.wait_for_exit().await;
    handler.await.unwrap();

    assert_eq!(process.exit_codes(), vec![0]);
    assert_eq!(mock.count("stop"), 1);
    assert!(!mock.container_exists(&id));
    assert_eq!(ctrl.container_id(), None);
}

#[tokio::test]
async fn test_failed_stop_exits_with_error() {
    let mock = Arc::new(MockRuntime::new());
    let ctrl = controller(&mock);
    let process = MockProcess::new();

    ctrl.start(StartOptions::default()).await.unwrap();
    mock.set_fail_on("stop");

    ctrl.load_exit_handler(process.clone());
    process.send_terminate();
    process.wait_for_exit().await;

    assert_eq!(process.exit_codes(), vec![1]);
    assert_eq!(mock.count("remove"), 0);
}

#[tokio::test]
async fn test_termination_before_start_exits_with_error() {
    let mock = Arc::new(MockRuntime::new());
    let ctrl = controller(&mock);
    let process = MockProcess::new();

    ctrl.load_exit_handler(process.clone());
    process.send_terminate();
    process.wait_for_exit().await;

    // nothing to stop yet
    assert_eq!(process.exit_codes(), vec![1]);
    assert!(mock.get_commands().is_empty());
}

#[tokio::test]
async fn test_handler_idle_without_signal() {
    let mock = Arc::new(MockRuntime::new());
    let ctrl = controller(&mock);
    let process = MockProcess::new();

    ctrl.start(StartOptions::default()).await.unwrap();
    let handler = ctrl.load_exit_handler(process.clone());
    tokio::task::yield_now().await;

    assert!(!handler.is_finished());
    assert!(process.exit_codes().is_empty());
    assert_eq!(mock.count("stop"), 0);
    handler.abort();
}
