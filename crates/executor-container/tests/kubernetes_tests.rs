use executor_container::{KubernetesConfig, KubernetesExecutor};
use executor_core::handle::TaskHandle;
use executor_core::task::{TaskState, KILLED_BY_SIGNAL, WAIT_FOREVER};
use executor_core::Executor;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn executor() -> KubernetesExecutor {
    let dir = std::env::temp_dir().join(format!("k8s-executor-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    KubernetesExecutor::new(KubernetesConfig {
        image: "busybox".into(),
        ..Default::default()
    })
    .with_output_dir(dir)
}

// The tests below need `kubectl` pointing at a cluster that can pull busybox.

#[tokio::test]
#[ignore]
async fn pod_output_and_exit_code() {
    let handle = executor().execute("echo output; exit 3").await.unwrap();

    assert!(handle.wait(WAIT_FOREVER).await.unwrap());
    assert_eq!(handle.exit_code().unwrap(), 3);
    assert!(!handle.address().is_empty());

    let mut stdout = String::new();
    handle.stdout_file().unwrap().read_to_string(&mut stdout).unwrap();
    assert!(stdout.contains("output"));
    handle.erase_output().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn stop_deletes_pod() {
    let handle = executor().execute("sleep 3600").await.unwrap();

    assert!(!handle.wait(Duration::from_millis(100)).await.unwrap());
    assert_eq!(handle.status(), TaskState::Running);

    handle.stop().await.unwrap();
    assert_eq!(handle.status(), TaskState::Terminated);
    assert_eq!(handle.exit_code().unwrap(), KILLED_BY_SIGNAL);
    handle.erase_output().await.unwrap();
}

#[tokio::test]
async fn missing_kubectl_is_launch_failure() {
    let dir = std::env::temp_dir().join(format!("k8s-missing-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let executor = KubernetesExecutor::new(KubernetesConfig {
        kubectl: "/nonexistent/kubectl".into(),
        ..Default::default()
    })
    .with_output_dir(&dir);

    let err = executor.execute("true").await.err().unwrap();
    assert!(matches!(
        err,
        executor_core::ExecutorError::LaunchFailed { .. }
    ));
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
}

const RUNNING_EVENT: &str = r#"{"type":"ADDED","object":{"metadata":{"name":"p"},"status":{"phase":"Running","hostIP":"10.0.0.7"}}}"#;
const SUCCEEDED_EVENT: &str = r#"{"type":"MODIFIED","object":{"metadata":{"name":"p"},"status":{"phase":"Succeeded","hostIP":"10.0.0.7","containerStatuses":[{"state":{"terminated":{"exitCode":0}}}]}}}"#;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("k8s-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a stand-in `kubectl` that replays `events` on watch, then hangs.
/// `delete` runs `on_delete` as its body.
fn fake_kubectl(dir: &Path, events: &[&str], on_delete: &str) -> PathBuf {
    let replay: String = events
        .iter()
        .map(|e| format!("    echo '{}'\n", e))
        .collect();
    let script = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
         create) cat >/dev/null ;;\n\
         logs) echo hello ;;\n\
         delete) {on_delete} ;;\n\
         get)\n\
         \x20 if [ \"$2\" = pods ]; then\n\
         {replay}\
         \x20   exec sleep 30\n\
         \x20 fi\n\
         \x20 echo pod/p ;;\n\
         esac\n"
    );
    let path = dir.join("kubectl");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_executor(dir: &Path, kubectl: PathBuf) -> KubernetesExecutor {
    std::fs::create_dir_all(dir.join("out")).unwrap();
    KubernetesExecutor::new(KubernetesConfig {
        kubectl: kubectl.to_string_lossy().into_owned(),
        launch_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .with_output_dir(dir.join("out"))
}

#[tokio::test]
async fn finished_pod_terminates_even_if_delete_fails() {
    let dir = scratch("finished");
    let kubectl = fake_kubectl(
        &dir,
        &[RUNNING_EVENT, SUCCEEDED_EVENT],
        "echo forbidden >&2; exit 1",
    );

    let handle = fake_executor(&dir, kubectl).execute("echo hello").await.unwrap();

    assert!(handle.wait(Duration::from_secs(5)).await.unwrap());
    assert_eq!(handle.status(), TaskState::Terminated);
    assert_eq!(handle.exit_code().unwrap(), 0);
    assert_eq!(handle.address(), "10.0.0.7");

    let mut stdout = String::new();
    handle.stdout_file().unwrap().read_to_string(&mut stdout).unwrap();
    assert!(stdout.contains("hello"));

    handle.stop().await.unwrap();
    handle.erase_output().await.unwrap();
}

#[tokio::test]
async fn dropping_running_pod_handle_deletes_pod() {
    let dir = scratch("dropped");
    let marker = dir.join("deleted");
    let kubectl = fake_kubectl(
        &dir,
        &[RUNNING_EVENT],
        &format!("touch {}", marker.display()),
    );

    let handle = fake_executor(&dir, kubectl).execute("sleep 3600").await.unwrap();
    assert_eq!(handle.status(), TaskState::Running);
    drop(handle);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !marker.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marker.exists());
}
