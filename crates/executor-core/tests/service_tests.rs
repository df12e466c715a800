mod common;

use common::{MockHandle, MockLauncher};
use executor_core::error::ExecutorError;
use executor_core::handle::TaskHandle;
use executor_core::task::TaskState;
use executor_core::{Launcher, ServiceHandle, ServiceLauncher};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn stop_of_running_service_delegates() {
    let inner = MockHandle::running("memcached").shared();
    let service = ServiceHandle::new(inner.clone());

    service.stop().await.unwrap();
    assert_eq!(inner.stop_count(), 1);
    assert_eq!(service.status(), TaskState::Terminated);
}

#[tokio::test]
async fn premature_termination_reported_on_stop() {
    let inner = MockHandle::terminated("memcached", 1)
        .with_output("bind failed\n")
        .shared();
    let service = ServiceHandle::new(inner.clone());

    let err = service.stop().await.unwrap_err();
    assert!(matches!(err, ExecutorError::ServiceStopped { .. }));
    assert_eq!(inner.stop_count(), 0);

    // Sticky once reported.
    let err = service.wait(Duration::from_millis(1)).await.unwrap_err();
    assert!(matches!(err, ExecutorError::ServiceStopped { .. }));
}

#[tokio::test]
async fn premature_termination_reported_on_wait() {
    let inner = MockHandle::running("nginx").shared();
    let service = ServiceHandle::new(inner.clone());

    assert!(!service.wait(Duration::from_millis(5)).await.unwrap());
    inner.finish(0);

    let err = service.wait(Duration::from_millis(5)).await.unwrap_err();
    assert!(err.to_string().contains("nginx"));
}

#[tokio::test]
async fn requested_stop_is_not_an_error() {
    let inner = MockHandle::running("redis").shared();
    let service = ServiceHandle::new(inner.clone());

    service.stop().await.unwrap();
    assert!(service.wait(Duration::from_millis(5)).await.unwrap());
    service.stop().await.unwrap();
}

#[tokio::test]
async fn queries_delegate_to_inner() {
    let inner = MockHandle::terminated("redis", 4).with_address("10.1.1.1").shared();
    let service = ServiceHandle::new(inner);

    assert_eq!(service.exit_code().unwrap(), 4);
    assert_eq!(service.address(), "10.1.1.1");
    assert!(service.to_string().contains("redis"));
}

#[tokio::test]
async fn launcher_wraps_handles() {
    let inner = MockHandle::terminated("memcached", 0).shared();
    let launcher = ServiceLauncher::new(Arc::new(MockLauncher::new(vec![inner])));

    assert_eq!(launcher.name(), "mock");
    let handle = launcher.launch().await.unwrap();
    let err = handle.stop().await.unwrap_err();
    assert!(matches!(err, ExecutorError::ServiceStopped { .. }));
}

#[tokio::test]
async fn launcher_propagates_launch_errors() {
    let launcher = ServiceLauncher::new(Arc::new(MockLauncher::failing()));
    assert!(launcher.launch().await.is_err());
}
