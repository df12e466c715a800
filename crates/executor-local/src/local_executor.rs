use executor_core::config::ExecutorConfig;
use executor_core::error::{ExecutorError, Result};
use executor_core::handle::{check_launch, SharedTaskHandle, TaskHandle};
use executor_core::output::{OutputPaths, OutputSink};
use executor_core::task::{Latch, TaskState, KILLED_BY_SIGNAL, KILL_TIMEOUT};
use executor_core::{Decorator, Decorators, Executor, InterruptGuard};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Address reported by every local task.
pub const LOCAL_ADDRESS: &str = "127.0.0.1";

const OUTPUT_PREFIX: &str = "local";

/// Local executor: runs commands through `sh -c` on this host, each in its
/// own process group so `stop` takes down everything the command spawned.
pub struct LocalExecutor {
    name: String,
    decorators: Decorators,
    guard: Option<InterruptGuard>,
    output_dir: Option<PathBuf>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
            decorators: Decorators::new(),
            guard: None,
            output_dir: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new()
            .with_name(config.name.clone())
            .with_decorators(config.decorators())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_decorators(mut self, decorators: Decorators) -> Self {
        self.decorators = decorators;
        self
    }

    /// Registers every launched handle with `guard`.
    pub fn with_guard(mut self, guard: InterruptGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Creates output directories under `dir` instead of the working directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    fn create_sink(&self, command: &str) -> Result<OutputSink> {
        match &self.output_dir {
            Some(dir) => OutputSink::create_in(dir, OUTPUT_PREFIX, command),
            None => OutputSink::create(OUTPUT_PREFIX, command),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn(command: &str, sink: &OutputSink) -> io::Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink.stdout.try_clone()?))
        .stderr(Stdio::from(sink.stderr.try_clone()?))
        .process_group(0)
        .spawn()
}

/// Reaps the child and publishes its exit code. A failing `wait` means the
/// process table can no longer be trusted, so the whole process goes down.
async fn supervise(mut child: Child, sink: OutputSink, exit: Arc<Latch<i32>>, pid: i32) {
    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            error!("Waiting for local process {} failed: {}", pid, e);
            std::process::abort();
        }
    };

    let code = status.code().unwrap_or(KILLED_BY_SIGNAL);
    if let Err(e) = tokio::task::spawn_blocking(move || sink.close()).await {
        error!("Closing output of local process {} failed: {}", pid, e);
    }
    debug!("Local process {} exited: {}", pid, status);
    exit.set(code);
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn executor_type(&self) -> &str {
        "local"
    }

    async fn execute(&self, command: &str) -> Result<SharedTaskHandle> {
        let decorated = self.decorators.decorate(command);
        debug!("Local exec: {}", decorated);

        let sink = self.create_sink(command)?;
        let output = sink.paths().clone();

        let child = match spawn(&decorated, &sink) {
            Ok(child) => child,
            Err(e) => {
                let _ = output.erase();
                return Err(ExecutorError::launch_failed(command, LOCAL_ADDRESS, e));
            }
        };
        let pid = match child.id() {
            Some(pid) => pid as i32,
            None => {
                let _ = output.erase();
                return Err(ExecutorError::launch_failed(
                    command,
                    LOCAL_ADDRESS,
                    "process was reaped before its pid was read",
                ));
            }
        };

        let exit = Arc::new(Latch::new());
        tokio::spawn(supervise(child, sink, exit.clone(), pid));

        info!("Started {:?} locally with pid {}", command, pid);
        let handle: SharedTaskHandle = Arc::new(LocalTaskHandle {
            command: command.to_string(),
            pid,
            output,
            exit,
        });
        if let Some(guard) = &self.guard {
            guard.register(&handle);
        }

        if let Err(e) = check_launch(command, &self.name, handle.as_ref()).await {
            let _ = handle.erase_output().await;
            return Err(e);
        }
        Ok(handle)
    }
}

/// Handle to a process started by `LocalExecutor`.
pub struct LocalTaskHandle {
    command: String,
    // Also the process group id.
    pid: i32,
    output: OutputPaths,
    exit: Arc<Latch<i32>>,
}

impl LocalTaskHandle {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn output(&self) -> &OutputPaths {
        &self.output
    }

    fn kill_group(&self) -> Result<()> {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-self.pid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // The group is already gone; the supervisor will catch up.
            return Ok(());
        }
        Err(ExecutorError::Message(format!(
            "cannot kill process group {} of {:?}: {}",
            self.pid, self.command, err
        )))
    }
}

/// A handle dropped while its task runs takes the process group down with it.
impl Drop for LocalTaskHandle {
    fn drop(&mut self) {
        if self.exit.is_set() {
            return;
        }
        warn!("{} dropped while running, killing it", self);
        if let Err(e) = self.kill_group() {
            error!("{}", e);
        }
    }
}

impl fmt::Display for LocalTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Local {:?} with pid {}", self.command, self.pid)
    }
}

#[async_trait::async_trait]
impl TaskHandle for LocalTaskHandle {
    async fn stop(&self) -> Result<()> {
        if self.exit.is_set() {
            return Ok(());
        }

        debug!("Sending SIGKILL to process group {}", self.pid);
        self.kill_group()?;

        match self.exit.wait_timeout(KILL_TIMEOUT).await {
            Some(_) => Ok(()),
            None => {
                error!("{} did not terminate after SIGKILL", self);
                Err(ExecutorError::CannotTerminate {
                    command: self.command.clone(),
                    address: LOCAL_ADDRESS.to_string(),
                    timeout: KILL_TIMEOUT,
                })
            }
        }
    }

    fn status(&self) -> TaskState {
        if self.exit.is_set() {
            TaskState::Terminated
        } else {
            TaskState::Running
        }
    }

    fn exit_code(&self) -> Result<i32> {
        self.exit.get().ok_or_else(|| ExecutorError::NotTerminated {
            command: self.command.clone(),
        })
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        Ok(self.exit.wait_timeout(timeout).await.is_some())
    }

    fn stdout_file(&self) -> Result<File> {
        self.output.open_stdout()
    }

    fn stderr_file(&self) -> Result<File> {
        self.output.open_stderr()
    }

    async fn erase_output(&self) -> Result<()> {
        self.output.erase()
    }

    fn address(&self) -> String {
        LOCAL_ADDRESS.to_string()
    }
}
