#![allow(dead_code)]

use executor_core::error::{ExecutorError, Result};
use executor_core::handle::{SharedTaskHandle, TaskHandle};
use executor_core::task::{Latch, TaskState, KILLED_BY_SIGNAL};
use executor_core::Launcher;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory task handle with scripted behaviour.
pub struct MockHandle {
    name: String,
    address: String,
    exit: Latch<i32>,
    stop_error: Option<String>,
    wait_error: Mutex<Option<String>>,
    output: Option<PathBuf>,
    stop_log: Option<Arc<Mutex<Vec<String>>>>,
    pub stops: AtomicUsize,
    pub erases: AtomicUsize,
    pub cleans: AtomicUsize,
}

impl MockHandle {
    pub fn running(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            exit: Latch::new(),
            stop_error: None,
            wait_error: Mutex::new(None),
            output: None,
            stop_log: None,
            stops: AtomicUsize::new(0),
            erases: AtomicUsize::new(0),
            cleans: AtomicUsize::new(0),
        }
    }

    pub fn terminated(name: &str, code: i32) -> Self {
        let handle = Self::running(name);
        handle.finish(code);
        handle
    }

    pub fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub fn with_wait_error(self, message: &str) -> Self {
        *self.wait_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Appends the handle's name to `log` on every stop.
    pub fn with_stop_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.stop_log = Some(log);
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Backs stdout and stderr with a scratch file holding `contents`.
    pub fn with_output(mut self, contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("mock-{}-{}", self.name, unique_suffix()));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        self.output = Some(path);
        self
    }

    pub fn finish(&self, code: i32) {
        self.exit.set(code);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<MockHandle> {
        Arc::new(self)
    }
}

fn unique_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}-{}", std::process::id(), nanos)
}

impl fmt::Display for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mock {:?}", self.name)
    }
}

#[async_trait::async_trait]
impl TaskHandle for MockHandle {
    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.stop_log {
            log.lock().unwrap().push(self.name.clone());
        }
        if let Some(message) = &self.stop_error {
            return Err(ExecutorError::Message(message.clone()));
        }
        self.exit.set(KILLED_BY_SIGNAL);
        Ok(())
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
            command: self.name.clone(),
        })
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        let wait_error = self.wait_error.lock().unwrap().clone();
        if let Some(message) = wait_error {
            return Err(ExecutorError::Message(message));
        }
        Ok(self.exit.wait_timeout(timeout).await.is_some())
    }

    fn stdout_file(&self) -> Result<File> {
        match &self.output {
            Some(path) => Ok(File::open(path)?),
            None => Err(ExecutorError::Message(format!("{} has no output", self.name))),
        }
    }

    fn stderr_file(&self) -> Result<File> {
        self.stdout_file()
    }

    async fn clean(&self) -> Result<()> {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn erase_output(&self) -> Result<()> {
        self.erases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

/// Launcher handing out prepared handles, or failing when none are left.
pub struct MockLauncher {
    handles: Mutex<Vec<Arc<MockHandle>>>,
    pub launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new(handles: Vec<Arc<MockHandle>>) -> Self {
        Self {
            handles: Mutex::new(handles),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Launcher for MockLauncher {
    fn name(&self) -> String {
        "mock".to_string()
    }

    async fn launch(&self) -> Result<SharedTaskHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut handles = self.handles.lock().unwrap();
            if handles.is_empty() {
                None
            } else {
                Some(handles.remove(0))
            }
        };
        match next {
            Some(handle) => Ok(handle as SharedTaskHandle),
            None => Err(ExecutorError::Message("launch failed".into())),
        }
    }
}
