mod common;

use common::MockHandle;
use executor_core::handle::{SharedTaskHandle, TaskHandle};
use executor_core::task::TaskState;
use executor_core::InterruptGuard;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn stop_all_stops_every_live_handle() {
    let guard = InterruptGuard::new();
    let handles: Vec<_> = (0..3)
        .map(|i| MockHandle::running(&format!("sleep-{}", i)).shared())
        .collect();
    for handle in &handles {
        guard.register(&(handle.clone() as SharedTaskHandle));
    }
    assert_eq!(guard.len(), 3);

    guard.stop_all().await;
    for handle in &handles {
        assert_eq!(handle.stop_count(), 1);
        assert_eq!(handle.status(), TaskState::Terminated);
    }
}

#[tokio::test]
async fn dropped_handles_are_forgotten() {
    let guard = InterruptGuard::new();
    let kept = MockHandle::running("kept").shared();
    guard.register(&(kept.clone() as SharedTaskHandle));
    {
        let dropped: SharedTaskHandle = MockHandle::running("dropped").shared();
        guard.register(&dropped);
        assert_eq!(guard.len(), 2);
    }
    assert_eq!(guard.len(), 1);

    guard.stop_all().await;
    assert_eq!(kept.stop_count(), 1);
}

#[tokio::test]
async fn stop_errors_do_not_abort_stop_all() {
    let guard = InterruptGuard::new();
    let failing = MockHandle::running("failing").with_stop_error("busy").shared();
    let healthy = MockHandle::running("healthy").shared();
    guard.register(&(healthy.clone() as SharedTaskHandle));
    guard.register(&(failing.clone() as SharedTaskHandle));

    guard.stop_all().await;
    assert_eq!(failing.stop_count(), 1);
    assert_eq!(healthy.stop_count(), 1);
}

#[tokio::test]
async fn clones_share_the_registry() {
    let guard = InterruptGuard::new();
    let clone = guard.clone();
    let handle = MockHandle::running("shared").shared();
    clone.register(&(handle.clone() as SharedTaskHandle));
    assert!(!guard.is_empty());
}

#[tokio::test]
async fn stop_all_runs_newest_first() {
    let guard = InterruptGuard::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = ["master", "agent", "loadgen"]
        .iter()
        .map(|name| MockHandle::running(name).with_stop_log(log.clone()).shared())
        .collect();
    for handle in &handles {
        guard.register(&(handle.clone() as SharedTaskHandle));
    }

    guard.stop_all().await;
    assert_eq!(*log.lock().unwrap(), vec!["loadgen", "agent", "master"]);
}
