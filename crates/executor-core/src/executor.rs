use crate::error::Result;
use crate::handle::SharedTaskHandle;
use std::sync::Arc;
use std::time::Duration;

/// Creates the execution environment for a command and starts it.
/// Every executor type implements this.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor instance.
    fn name(&self) -> &str;

    /// Executor type string ("local", "remote", "kubernetes").
    fn executor_type(&self) -> &str;

    /// Starts `command` through a POSIX shell and returns once it runs.
    /// No handle is produced when the launch fails.
    async fn execute(&self, command: &str) -> Result<SharedTaskHandle>;
}

/// Factory producing task handles for a named workload kind.
#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    fn name(&self) -> String;

    async fn launch(&self) -> Result<SharedTaskHandle>;
}

/// A launcher whose task drives load at a requested rate.
#[async_trait::async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Fills the target service with the data set it will be queried for.
    async fn populate(&self) -> Result<()>;

    /// Finds the highest rate meeting `slo`. Returns `(qps, sli)`.
    async fn tune(&self, slo: u64) -> Result<(u64, u64)>;

    /// Drives `qps` for `duration` and returns the load task.
    async fn load(&self, qps: u64, duration: Duration) -> Result<SharedTaskHandle>;
}

/// Launches a fixed command on a fixed executor.
pub struct CommandLauncher {
    name: String,
    executor: Arc<dyn Executor>,
    command: String,
}

impl CommandLauncher {
    pub fn new(
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait::async_trait]
impl Launcher for CommandLauncher {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn launch(&self) -> Result<SharedTaskHandle> {
        self.executor.execute(&self.command).await
    }
}
