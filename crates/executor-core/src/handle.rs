use crate::error::{ErrorCollection, ExecutorError, Result};
use crate::logutil::{log_output, DEFAULT_OUTPUT_LINES};
use crate::task::TaskState;
use std::fmt;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// How long executors give a freshly spawned task to fail before handing it out.
pub const LAUNCH_CHECK_DELAY: Duration = Duration::from_millis(100);

/// Runtime object representing an in-flight or completed task.
///
/// Every executor returns one of these. State moves from `Running` to
/// `Terminated` exactly once; `stop` returning `Ok` guarantees `Terminated`.
/// The `Display` impl is the name used in logs.
#[async_trait::async_trait]
pub trait TaskHandle: Send + Sync + fmt::Display {
    /// Terminates the task and waits for it to go down.
    async fn stop(&self) -> Result<()>;

    fn status(&self) -> TaskState;

    /// Fails with `NotTerminated` while the task is running.
    fn exit_code(&self) -> Result<i32>;

    /// Waits for termination for at most `timeout` (`WAIT_FOREVER` means no
    /// bound). Returns whether the task has terminated.
    async fn wait(&self, timeout: Duration) -> Result<bool>;

    /// A fresh read handle on the stdout file, positioned at offset 0.
    fn stdout_file(&self) -> Result<File>;

    /// A fresh read handle on the stderr file, positioned at offset 0.
    fn stderr_file(&self) -> Result<File>;

    /// Releases runtime resources still held by the handle.
    async fn clean(&self) -> Result<()> {
        Ok(())
    }

    /// Removes the output directory. Idempotent once the task terminated.
    async fn erase_output(&self) -> Result<()>;

    /// Host other processes can use to reach the task.
    fn address(&self) -> String;
}

pub type SharedTaskHandle = Arc<dyn TaskHandle>;

/// Stops the task, then erases its output, collecting both errors.
pub async fn stop_and_erase_output(handle: &dyn TaskHandle) -> Result<()> {
    let mut errors = ErrorCollection::new();
    errors.add(handle.stop().await);
    errors.add(handle.erase_output().await);
    errors.into_result()
}

/// Gives a just-launched task a moment to fail and reports it as a launch
/// failure if it exited non-zero. Binaries that are missing or called with
/// wrong arguments usually die within this window.
pub async fn check_launch(
    command: &str,
    executor_name: &str,
    handle: &dyn TaskHandle,
) -> Result<()> {
    handle.wait(LAUNCH_CHECK_DELAY).await?;
    if handle.status() != TaskState::Terminated {
        return Ok(());
    }

    match handle.exit_code() {
        Ok(0) => {
            debug!(
                "Task {:?} launched using {} on {} has ended successfully (exit code: 0)",
                command,
                executor_name,
                handle.address()
            );
            Ok(())
        }
        Ok(code) => {
            error!(
                "Task {:?} launched using {} on {} has failed: exit code {}",
                command,
                executor_name,
                handle.address(),
                code
            );
            log_output(handle, DEFAULT_OUTPUT_LINES);
            Err(ExecutorError::launch_failed(
                command,
                handle.address(),
                format!("exited immediately with code {}", code),
            ))
        }
        Err(e) => {
            error!(
                "Task {:?} launched using {} on {} has failed, cannot get exit code: {}",
                command,
                executor_name,
                handle.address(),
                e
            );
            log_output(handle, DEFAULT_OUTPUT_LINES);
            Err(ExecutorError::launch_failed(command, handle.address(), e))
        }
    }
}
