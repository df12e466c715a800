use crate::error::{ErrorCollection, ExecutorError, Result};
use crate::executor::Launcher;
use crate::handle::{SharedTaskHandle, TaskHandle};
use crate::task::{Latch, TaskState, WAIT_FOREVER};
use std::fmt;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Runs launchers one after another, each starting when the previous task
/// terminated with exit code 0.
///
/// A failing phase ends the chain with its error. `stop` stops whichever
/// phase is running and no later phase is launched. The chain is
/// `Terminated` once its watcher is done.
pub struct ChainedTaskHandle {
    state: Arc<ChainState>,
    stop_tx: mpsc::Sender<()>,
}

struct ChainState {
    first: String,
    current: Mutex<SharedTaskHandle>,
    launched: Mutex<Vec<SharedTaskHandle>>,
    // Handed to the first `stop`/`wait` caller that observes the finished chain.
    recorded_error: Mutex<Option<ExecutorError>>,
    finished: Latch<()>,
}

impl ChainState {
    fn current(&self) -> SharedTaskHandle {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn advance(&self, next: SharedTaskHandle) {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(next.clone());
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn take_error(&self) -> Option<ExecutorError> {
        self.recorded_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl ChainedTaskHandle {
    /// Watches `first` and launches `next` in order as phases succeed.
    /// Must be called from within a tokio runtime.
    pub fn new(first: SharedTaskHandle, next: Vec<Arc<dyn Launcher>>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let state = Arc::new(ChainState {
            first: first.to_string(),
            current: Mutex::new(first.clone()),
            launched: Mutex::new(vec![first]),
            recorded_error: Mutex::new(None),
            finished: Latch::new(),
        });

        tokio::spawn(watch(state.clone(), next, stop_rx));

        Self { state, stop_tx }
    }

    fn finished_result(&self) -> Result<()> {
        match self.state.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn watch(state: Arc<ChainState>, next: Vec<Arc<dyn Launcher>>, mut stop_rx: mpsc::Receiver<()>) {
    if let Err(e) = run_chain(&state, next, &mut stop_rx).await {
        warn!("Chain starting with {} finished with error: {}", state.first, e);
        *state
            .recorded_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(e);
    }
    state.finished.set(());
}

async fn run_chain(
    state: &ChainState,
    next: Vec<Arc<dyn Launcher>>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    for launcher in next {
        let handle = state.current();
        // A pending stop wins over a phase that finished at the same time.
        let stopped = tokio::select! {
            biased;
            _ = stop_rx.recv() => true,
            result = handle.wait(WAIT_FOREVER) => {
                result?;
                ensure_succeeded(handle.as_ref())?;
                false
            }
        };
        if stopped {
            debug!("Chain stopped while {} was running", handle);
            return handle.stop().await;
        }

        debug!("{} succeeded, launching {}", handle, launcher.name());
        let launched = launcher.launch().await?;
        state.advance(launched);
    }

    let last = state.current();
    tokio::select! {
        biased;
        _ = stop_rx.recv() => {
            debug!("Chain stopped while {} was running", last);
            last.stop().await
        }
        result = last.wait(WAIT_FOREVER) => result.map(|_| ()),
    }
}

fn ensure_succeeded(handle: &dyn TaskHandle) -> Result<()> {
    match handle.exit_code()? {
        0 => Ok(()),
        code => Err(ExecutorError::Message(format!(
            "{} exited with code {}, chain aborted",
            handle, code
        ))),
    }
}

impl fmt::Display for ChainedTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain starting with {}", self.state.first)
    }
}

#[async_trait::async_trait]
impl TaskHandle for ChainedTaskHandle {
    async fn stop(&self) -> Result<()> {
        // A full buffer means a stop is already pending.
        let _ = self.stop_tx.try_send(());
        self.state.finished.wait().await;
        self.finished_result()
    }

    fn status(&self) -> TaskState {
        if self.state.finished.is_set() {
            TaskState::Terminated
        } else {
            TaskState::Running
        }
    }

    fn exit_code(&self) -> Result<i32> {
        if !self.state.finished.is_set() {
            return Err(ExecutorError::NotTerminated {
                command: self.to_string(),
            });
        }
        self.state.current().exit_code()
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        match self.state.finished.wait_timeout(timeout).await {
            Some(()) => self.finished_result().map(|_| true),
            None => Ok(false),
        }
    }

    fn stdout_file(&self) -> Result<File> {
        self.state.current().stdout_file()
    }

    fn stderr_file(&self) -> Result<File> {
        self.state.current().stderr_file()
    }

    async fn clean(&self) -> Result<()> {
        let launched = self
            .state
            .launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut errors = ErrorCollection::new();
        for handle in launched {
            errors.add(handle.clean().await);
        }
        errors.into_result()
    }

    async fn erase_output(&self) -> Result<()> {
        let launched = self
            .state
            .launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut errors = ErrorCollection::new();
        for handle in launched {
            errors.add(handle.erase_output().await);
        }
        errors.into_result()
    }

    fn address(&self) -> String {
        self.state.current().address()
    }
}
