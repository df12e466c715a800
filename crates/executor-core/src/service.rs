//! Wrappers for tasks that must keep running until told to stop.
//!
//! A service that terminates on its own is an error: the next `stop` or
//! `wait` reports `ServiceStopped` and dumps the tail of the service output.
//! Once reported, every later `stop`/`wait` keeps returning the error.

use crate::error::{ExecutorError, Result};
use crate::executor::Launcher;
use crate::handle::{SharedTaskHandle, TaskHandle};
use crate::logutil::{log_output, DEFAULT_OUTPUT_LINES};
use crate::task::TaskState;
use std::fmt;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::error;

pub struct ServiceHandle {
    inner: SharedTaskHandle,
    state: Mutex<ServiceState>,
}

#[derive(Default)]
struct ServiceState {
    stop_requested: bool,
    stopped_prematurely: bool,
}

impl ServiceHandle {
    pub fn new(inner: SharedTaskHandle) -> Self {
        Self {
            inner,
            state: Mutex::new(ServiceState::default()),
        }
    }

    fn service_stopped(&self) -> ExecutorError {
        ExecutorError::ServiceStopped {
            command: self.inner.to_string(),
        }
    }

    /// Fails if the service went down without being asked to.
    fn check(&self, stopping: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stopped_prematurely {
            return Err(self.service_stopped());
        }

        if !state.stop_requested && self.inner.status() == TaskState::Terminated {
            state.stopped_prematurely = true;
            drop(state);

            let err = self.service_stopped();
            error!("{}", err);
            log_output(self.inner.as_ref(), DEFAULT_OUTPUT_LINES);
            return Err(err);
        }

        if stopping {
            state.stop_requested = true;
        }
        Ok(())
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service {}", self.inner)
    }
}

#[async_trait::async_trait]
impl TaskHandle for ServiceHandle {
    async fn stop(&self) -> Result<()> {
        self.check(true)?;
        self.inner.stop().await
    }

    fn status(&self) -> TaskState {
        self.inner.status()
    }

    fn exit_code(&self) -> Result<i32> {
        self.inner.exit_code()
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        self.check(false)?;
        self.inner.wait(timeout).await
    }

    fn stdout_file(&self) -> Result<File> {
        self.inner.stdout_file()
    }

    fn stderr_file(&self) -> Result<File> {
        self.inner.stderr_file()
    }

    async fn clean(&self) -> Result<()> {
        self.inner.clean().await
    }

    async fn erase_output(&self) -> Result<()> {
        self.inner.erase_output().await
    }

    fn address(&self) -> String {
        self.inner.address()
    }
}

/// Launcher whose handles come back wrapped in `ServiceHandle`.
pub struct ServiceLauncher {
    inner: Arc<dyn Launcher>,
}

impl ServiceLauncher {
    pub fn new(inner: Arc<dyn Launcher>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl Launcher for ServiceLauncher {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn launch(&self) -> Result<SharedTaskHandle> {
        let handle = self.inner.launch().await?;
        Ok(Arc::new(ServiceHandle::new(handle)))
    }
}
