use crate::kubectl::Kubectl;
use crate::manifest::{pod_manifest, pod_name};
use crate::watch::{EventDecoder, EventKind, PodPhase, WatchEvent};
use executor_core::config::ExecutorConfig;
use executor_core::error::{ExecutorError, Result};
use executor_core::handle::{SharedTaskHandle, TaskHandle};
use executor_core::output::{OutputPaths, OutputSink};
use executor_core::task::{Latch, TaskState, KILLED_BY_SIGNAL};
use executor_core::{Decorator, Decorators, Executor, InterruptGuard};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

const OUTPUT_PREFIX: &str = "k8s";

const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `stop` waits for the pod object to disappear.
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pod placement and resources. CPU values are millicores, memory values bytes;
/// zero leaves the request or limit unset.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub kubectl: String,
    pub namespace: String,
    pub image: String,
    pub pod_name_prefix: String,
    pub cpu_request: u64,
    pub cpu_limit: u64,
    pub memory_request: u64,
    pub memory_limit: u64,
    pub privileged: bool,
    pub host_network: bool,
    /// `WAIT_FOREVER` waits for scheduling without bound.
    pub launch_timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            namespace: "default".to_string(),
            image: "centos:7".to_string(),
            pod_name_prefix: "substrate".to_string(),
            cpu_request: 0,
            cpu_limit: 0,
            memory_request: 0,
            memory_limit: 0,
            privileged: false,
            host_network: false,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }
}

impl KubernetesConfig {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        let defaults = Self::default();
        Self {
            kubectl: config.kubectl.clone().unwrap_or(defaults.kubectl),
            namespace: config.namespace.clone().unwrap_or(defaults.namespace),
            image: config.image.clone().unwrap_or(defaults.image),
            pod_name_prefix: config
                .pod_name_prefix
                .clone()
                .unwrap_or(defaults.pod_name_prefix),
            cpu_request: config.cpu_request.unwrap_or(0),
            cpu_limit: config.cpu_limit.unwrap_or(0),
            memory_request: config.memory_request.unwrap_or(0),
            memory_limit: config.memory_limit.unwrap_or(0),
            privileged: config.privileged,
            host_network: config.host_network,
            launch_timeout: config
                .launch_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.launch_timeout),
        }
    }
}

/// Kubernetes executor: runs each command in its own single-container pod.
pub struct KubernetesExecutor {
    name: String,
    config: KubernetesConfig,
    kubectl: Kubectl,
    decorators: Decorators,
    guard: Option<InterruptGuard>,
    output_dir: Option<PathBuf>,
}

impl KubernetesExecutor {
    pub fn new(config: KubernetesConfig) -> Self {
        let kubectl = Kubectl::new(config.kubectl.clone(), config.namespace.clone());
        Self {
            name: "kubernetes".to_string(),
            config,
            kubectl,
            decorators: Decorators::new(),
            guard: None,
            output_dir: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(KubernetesConfig::from_config(config))
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

    pub fn with_guard(mut self, guard: InterruptGuard) -> Self {
        self.guard = Some(guard);
        self
    }

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

/// State shared by a handle and its pod watcher.
struct PodState {
    kubectl: Kubectl,
    pod: String,
    host_ip: Mutex<Option<String>>,
    // Set once the pod runs (or already finished).
    started: Latch<()>,
    // Set once the pod finished or its object is gone.
    exit: Latch<i32>,
}

/// Watcher-side progress of one pod.
struct PodProgress {
    sink: Option<OutputSink>,
    exit_code: Option<i32>,
}

impl PodProgress {
    /// Copies the pod log into stdout and closes the output files.
    async fn drain_logs(&mut self, state: &PodState) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        let logs = match state.kubectl.logs(&state.pod).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Cannot fetch logs of pod {}: {}", state.pod, e);
                Vec::new()
            }
        };
        let pod = state.pod.clone();
        let written = tokio::task::spawn_blocking(move || {
            if let Err(e) = sink.stdout.write_all(&logs) {
                error!("Writing logs of pod {} failed: {}", pod, e);
            }
            sink.close();
        })
        .await;
        if let Err(e) = written {
            error!("Closing output of pod {} failed: {}", state.pod, e);
        }
    }
}

async fn watch_pod(state: Arc<PodState>, sink: OutputSink) {
    let mut progress = PodProgress {
        sink: Some(sink),
        exit_code: None,
    };

    loop {
        match follow_events(&state, &mut progress).await {
            Ok(true) => break,
            Ok(false) => debug!("Watch on pod {} ended, restarting", state.pod),
            Err(e) => {
                warn!("Watching pod {} failed: {}", state.pod, e);
                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        }
        // The deletion may have happened while nobody was watching.
        if let Ok(false) = state.kubectl.pod_exists(&state.pod).await {
            debug!("Pod {} is gone", state.pod);
            break;
        }
    }

    if let Some(sink) = progress.sink.take() {
        if let Err(e) = tokio::task::spawn_blocking(move || sink.close()).await {
            error!("Closing output of pod {} failed: {}", state.pod, e);
        }
    }
    let code = progress.exit_code.unwrap_or(KILLED_BY_SIGNAL);
    debug!("Pod {} terminated with exit code {}", state.pod, code);
    state.started.set(());
    state.exit.set(code);
}

/// Runs one watch stream. Returns `true` once the pod finished or was deleted.
async fn follow_events(state: &PodState, progress: &mut PodProgress) -> Result<bool> {
    let mut child = state.kubectl.watch(&state.pod).spawn()?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutorError::Kubernetes("watch has no stdout".into()))?;

    let mut decoder = EventDecoder::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            let _ = child.wait().await;
            return Ok(false);
        }
        for event in decoder.push(&buf[..n])? {
            if handle_event(state, progress, event).await? {
                return Ok(true);
            }
        }
    }
}

async fn handle_event(state: &PodState, progress: &mut PodProgress, event: WatchEvent) -> Result<bool> {
    match event.kind {
        EventKind::Deleted => return Ok(true),
        EventKind::Error => {
            warn!("Watch error for pod {}: {}", state.pod, event.message());
            return Ok(false);
        }
        EventKind::Bookmark => return Ok(false),
        EventKind::Added | EventKind::Modified => {}
    }

    let pod = event.pod()?;
    if let Some(ip) = pod.status.host_ip.as_ref().filter(|ip| !ip.is_empty()) {
        *state.host_ip.lock().unwrap_or_else(|e| e.into_inner()) = Some(ip.clone());
    }

    match pod.phase() {
        None | Some(PodPhase::Pending) => {}
        Some(PodPhase::Running) => {
            if state.started.set(()) {
                info!("Pod {} is running", state.pod);
            }
        }
        Some(PodPhase::Succeeded) | Some(PodPhase::Failed) => {
            let code = pod.exit_code();
            debug!("Pod {} finished with exit code {}", state.pod, code);
            progress.exit_code = Some(code);
            progress.drain_logs(state).await;
            state.started.set(());
            state.exit.set(code);
            if let Err(e) = state.kubectl.delete_pod(&state.pod).await {
                warn!("Deleting finished pod {} failed: {}", state.pod, e);
            }
            return Ok(true);
        }
        Some(PodPhase::Unknown) => {
            warn!("Pod {} is in unknown state", state.pod);
        }
    }
    Ok(false)
}

#[async_trait::async_trait]
impl Executor for KubernetesExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn executor_type(&self) -> &str {
        "kubernetes"
    }

    async fn execute(&self, command: &str) -> Result<SharedTaskHandle> {
        let decorated = self.decorators.decorate(command);
        let pod = pod_name(&self.config.pod_name_prefix);
        debug!("Kubernetes exec in pod {}: {}", pod, decorated);

        let sink = self.create_sink(command)?;
        let output = sink.paths().clone();

        let manifest = pod_manifest(&self.config, &pod, &decorated);
        if let Err(e) = self.kubectl.create(&manifest).await {
            let _ = output.erase();
            return Err(ExecutorError::launch_failed(command, "", e));
        }

        let state = Arc::new(PodState {
            kubectl: self.kubectl.clone(),
            pod: pod.clone(),
            host_ip: Mutex::new(None),
            started: Latch::new(),
            exit: Latch::new(),
        });
        tokio::spawn(watch_pod(state.clone(), sink));

        let timeout = self.config.launch_timeout;
        if state.started.wait_timeout(timeout).await.is_none() {
            error!(
                "Pod {} was not running after {:?}, deleting it",
                pod, timeout
            );
            if let Err(e) = self.kubectl.delete_pod(&pod).await {
                warn!("Deleting pod {} failed: {}", pod, e);
            }
            let _ = output.erase();
            return Err(ExecutorError::launch_failed(
                command,
                "",
                format!("pod {} not running after {:?}", pod, timeout),
            ));
        }

        let handle: SharedTaskHandle = Arc::new(KubernetesTaskHandle {
            command: command.to_string(),
            output,
            state,
        });
        info!("Started {:?} in pod {} on {}", command, pod, handle.address());
        if let Some(guard) = &self.guard {
            guard.register(&handle);
        }
        Ok(handle)
    }
}

/// Handle to a command running in a pod.
pub struct KubernetesTaskHandle {
    command: String,
    output: OutputPaths,
    state: Arc<PodState>,
}

impl KubernetesTaskHandle {
    pub fn pod_name(&self) -> &str {
        &self.state.pod
    }
}

/// A handle dropped while its pod runs deletes the pod.
impl Drop for KubernetesTaskHandle {
    fn drop(&mut self) {
        if self.state.exit.is_set() {
            return;
        }
        warn!("{} dropped while running, deleting it", self);
        if let Err(e) = self.state.kubectl.delete_pod_detached(&self.state.pod) {
            error!("{}", e);
        }
    }
}

impl fmt::Display for KubernetesTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pod {} running {:?}", self.state.pod, self.command)
    }
}

#[async_trait::async_trait]
impl TaskHandle for KubernetesTaskHandle {
    async fn stop(&self) -> Result<()> {
        if self.state.exit.is_set() {
            return Ok(());
        }

        debug!("Deleting pod {}", self.state.pod);
        self.state.kubectl.delete_pod(&self.state.pod).await?;
        match self.state.exit.wait_timeout(DELETE_TIMEOUT).await {
            Some(_) => Ok(()),
            None => Err(ExecutorError::CannotTerminate {
                command: self.command.clone(),
                address: self.address(),
                timeout: DELETE_TIMEOUT,
            }),
        }
    }

    fn status(&self) -> TaskState {
        if self.state.exit.is_set() {
            TaskState::Terminated
        } else {
            TaskState::Running
        }
    }

    fn exit_code(&self) -> Result<i32> {
        self.state
            .exit
            .get()
            .ok_or_else(|| ExecutorError::NotTerminated {
                command: self.command.clone(),
            })
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        Ok(self.state.exit.wait_timeout(timeout).await.is_some())
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
        self.state
            .host_ip
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_core::config::ExecutorType;
    use executor_core::task::WAIT_FOREVER;

    #[test]
    fn config_defaults() {
        let config = KubernetesConfig::default();
        assert_eq!(config.kubectl, "kubectl");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.launch_timeout, Duration::from_secs(60));
        assert_ne!(config.launch_timeout, WAIT_FOREVER);
    }

    #[test]
    fn config_from_executor_entry() {
        let mut entry = ExecutorConfig::local("k8s");
        entry.executor_type = ExecutorType::Kubernetes;
        entry.namespace = Some("bench".into());
        entry.image = Some("memcached:1.6".into());
        entry.cpu_limit = Some(1500);
        entry.privileged = true;
        entry.launch_timeout_secs = Some(0);

        let config = KubernetesConfig::from_config(&entry);
        assert_eq!(config.namespace, "bench");
        assert_eq!(config.image, "memcached:1.6");
        assert_eq!(config.cpu_limit, 1500);
        assert_eq!(config.cpu_request, 0);
        assert!(config.privileged);
        assert_eq!(config.launch_timeout, WAIT_FOREVER);
        assert_eq!(config.pod_name_prefix, "substrate");
    }
}
