use executor_core::config::ExecutorConfig;
use executor_core::error::{ExecutorError, Result};
use executor_core::handle::{check_launch, SharedTaskHandle, TaskHandle};
use executor_core::output::{OutputPaths, OutputSink};
use executor_core::task::{Latch, TaskState, KILLED_BY_SIGNAL, KILL_TIMEOUT};
use executor_core::{Decorator, Decorators, Executor, InterruptGuard};
use ssh2::{CheckResult, Channel, ErrorCode, KnownHostFileKind, PtyModeOpcode, PtyModes, Session};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const OUTPUT_PREFIX: &str = "remote";

const PTY_TERM: &str = "xterm";
const PTY_WIDTH: u32 = 80;
const PTY_HEIGHT: u32 = 40;
const PTY_BAUD: u32 = 14400;

/// libssh2 "would block" on a non-blocking session.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Exit code reported when the connection dies under a running task.
const CONNECTION_LOST: i32 = 255;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Where and as whom remote commands run.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    pub known_hosts_path: PathBuf,
}

impl RemoteConfig {
    /// Port 22, the current user, and that user's `~/.ssh` key and known hosts.
    pub fn new(host: impl Into<String>) -> Self {
        let ssh_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(".ssh");
        Self {
            host: host.into(),
            port: 22,
            user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            key_path: ssh_dir.join("id_rsa"),
            known_hosts_path: ssh_dir.join("known_hosts"),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| ExecutorError::Config("SSH executor requires 'host'".into()))?;

        let mut remote = Self::new(host);
        remote.port = config.ssh_port();
        if let Some(user) = &config.user {
            remote.user = user.clone();
        }
        if let Some(key_path) = &config.key_path {
            remote.key_path = expand_home(key_path);
        }
        if let Some(known_hosts) = &config.known_hosts_path {
            remote.known_hosts_path = expand_home(known_hosts);
        }
        Ok(remote)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// SSH executor: runs each command on its own session with a PTY attached,
/// streaming the PTY output into local files.
pub struct RemoteExecutor {
    name: String,
    config: RemoteConfig,
    decorators: Decorators,
    guard: Option<InterruptGuard>,
    output_dir: Option<PathBuf>,
}

impl RemoteExecutor {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            name: format!("remote {}", config.host),
            config,
            decorators: Decorators::new(),
            guard: None,
            output_dir: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        Ok(Self::new(RemoteConfig::from_config(config)?)
            .with_name(config.name.clone())
            .with_decorators(config.decorators()))
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

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn create_sink(&self, command: &str) -> Result<OutputSink> {
        match &self.output_dir {
            Some(dir) => OutputSink::create_in(dir, OUTPUT_PREFIX, command),
            None => OutputSink::create(OUTPUT_PREFIX, command),
        }
    }
}

fn ssh_error(context: &str, e: impl fmt::Display) -> ExecutorError {
    ExecutorError::Ssh(format!("{}: {}", context, e))
}

/// Establish an authenticated session with a known host.
fn connect(config: &RemoteConfig) -> Result<Session> {
    debug!("Connecting to {}@{}:{}", config.user, config.host, config.port);
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| ssh_error(&format!("TCP connect to {}:{}", config.host, config.port), e))?;

    let mut session = Session::new().map_err(|e| ssh_error("Session::new", e))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| ssh_error("Handshake", e))?;

    verify_host_key(&session, config)?;

    session
        .userauth_pubkey_file(&config.user, None, &config.key_path, None)
        .map_err(|e| ssh_error("Pubkey auth", e))?;
    if !session.authenticated() {
        return Err(ExecutorError::Ssh("Authentication failed".into()));
    }

    info!("SSH connected to {}@{}:{}", config.user, config.host, config.port);
    Ok(session)
}

/// The host must already be enrolled in the known hosts file.
fn verify_host_key(session: &Session, config: &RemoteConfig) -> Result<()> {
    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| ssh_error("Known hosts", e))?;
    known_hosts
        .read_file(&config.known_hosts_path, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            ssh_error(
                &format!("Reading {}", config.known_hosts_path.display()),
                e,
            )
        })?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| ExecutorError::Ssh("Server sent no host key".into()))?;

    match known_hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(ExecutorError::Ssh(format!(
            "host key for {} does not match {}",
            config.host,
            config.known_hosts_path.display()
        ))),
        CheckResult::NotFound => Err(ExecutorError::Ssh(format!(
            "host {} is not in {}",
            config.host,
            config.known_hosts_path.display()
        ))),
        CheckResult::Failure => Err(ExecutorError::Ssh(format!(
            "checking host key of {} failed",
            config.host
        ))),
    }
}

/// Connects, attaches a PTY and starts `command`. The returned session is
/// switched to non-blocking mode for the supervisor.
fn start_command(config: &RemoteConfig, command: &str) -> Result<(Session, Channel)> {
    let session = connect(config)?;
    let mut channel = session
        .channel_session()
        .map_err(|e| ssh_error("Channel", e))?;

    let mut modes = PtyModes::new();
    modes.set_boolean(PtyModeOpcode::ECHO, false);
    modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, PTY_BAUD);
    modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, PTY_BAUD);
    channel
        .request_pty(PTY_TERM, Some(modes), Some((PTY_WIDTH, PTY_HEIGHT, 0, 0)))
        .map_err(|e| ssh_error("PTY request", e))?;

    channel
        .exec(command)
        .map_err(|e| ssh_error(&format!("Exec '{}'", command), e))?;

    session.set_blocking(false);
    Ok((session, channel))
}

fn would_block(e: &ssh2::Error) -> bool {
    e.code() == ErrorCode::Session(LIBSSH2_ERROR_EAGAIN)
}

/// Repeats a libssh2 call until it stops asking to be retried.
fn retry<T>(mut call: impl FnMut() -> std::result::Result<T, ssh2::Error>) -> std::result::Result<T, ssh2::Error> {
    loop {
        match call() {
            Err(e) if would_block(&e) => thread::sleep(POLL_INTERVAL),
            other => return other,
        }
    }
}

enum Pump {
    Idle,
    Data,
    Failed(io::Error),
}

fn pump(reader: &mut impl Read, file: &mut File, buf: &mut [u8]) -> Pump {
    match reader.read(buf) {
        Ok(0) => Pump::Idle,
        Ok(n) => match file.write_all(&buf[..n]) {
            Ok(()) => Pump::Data,
            Err(e) => Pump::Failed(e),
        },
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Pump::Idle,
        Err(e) => Pump::Failed(e),
    }
}

/// Copies the channel into the output files until the command exits, the
/// connection drops or a stop is requested, then publishes the exit code.
fn supervise(
    session: Session,
    mut channel: Channel,
    mut sink: OutputSink,
    stop: Arc<AtomicBool>,
    exit: Arc<Latch<i32>>,
    host: String,
) {
    let mut buf = vec![0u8; 8192];
    let code = loop {
        if stop.load(Ordering::SeqCst) {
            // Closing the channel hangs up the PTY.
            if let Err(e) = retry(|| channel.close()) {
                warn!("Closing channel on {} failed: {}", host, e);
            }
            break KILLED_BY_SIGNAL;
        }

        let mut progressed = false;
        let mut lost = None;
        match pump(&mut channel, &mut sink.stdout, &mut buf) {
            Pump::Idle => {}
            Pump::Data => progressed = true,
            Pump::Failed(e) => lost = Some(e),
        }
        match pump(&mut channel.stderr(), &mut sink.stderr, &mut buf) {
            Pump::Idle => {}
            Pump::Data => progressed = true,
            Pump::Failed(e) => lost = Some(e),
        }
        if let Some(e) = lost {
            error!("Lost connection to {}: {}", host, e);
            break CONNECTION_LOST;
        }

        if !progressed {
            // Everything buffered has been copied once reads come back empty.
            if channel.eof() {
                break exit_code(&mut channel, &host);
            }
            thread::sleep(POLL_INTERVAL);
        }
    };

    sink.close();
    drop(channel);
    drop(session);
    debug!("Remote task on {} exited with {}", host, code);
    exit.set(code);
}

fn exit_code(channel: &mut Channel, host: &str) -> i32 {
    if let Err(e) = retry(|| channel.wait_close()) {
        warn!("Waiting for channel close on {} failed: {}", host, e);
        return CONNECTION_LOST;
    }
    match channel.exit_signal() {
        Ok(signal) if signal.exit_signal.is_some() => return KILLED_BY_SIGNAL,
        _ => {}
    }
    channel.exit_status().unwrap_or(CONNECTION_LOST)
}

#[async_trait::async_trait]
impl Executor for RemoteExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn executor_type(&self) -> &str {
        "remote"
    }

    async fn execute(&self, command: &str) -> Result<SharedTaskHandle> {
        let decorated = self.decorators.decorate(command);
        let host = self.config.host.clone();
        debug!("Remote exec on {}: {}", host, decorated);

        let sink = self.create_sink(command)?;
        let output = sink.paths().clone();

        let config = self.config.clone();
        let started = tokio::task::spawn_blocking(move || start_command(&config, &decorated))
            .await
            .map_err(|e| ExecutorError::Ssh(format!("connection task failed: {}", e)))
            .and_then(|result| result);
        let (session, channel) = match started {
            Ok(started) => started,
            Err(e) => {
                let _ = output.erase();
                return Err(ExecutorError::launch_failed(command, host, e));
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(Latch::new());
        let supervisor = {
            let (stop, exit, host) = (stop.clone(), exit.clone(), host.clone());
            thread::Builder::new()
                .name(format!("ssh-{}", host))
                .spawn(move || supervise(session, channel, sink, stop, exit, host))
        };
        if let Err(e) = supervisor {
            let _ = output.erase();
            return Err(ExecutorError::launch_failed(command, host, e));
        }

        info!("Started {:?} on {}", command, host);
        let handle: SharedTaskHandle = Arc::new(RemoteTaskHandle {
            command: command.to_string(),
            host,
            output,
            stop,
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

/// Handle to a command running over SSH.
pub struct RemoteTaskHandle {
    command: String,
    host: String,
    output: OutputPaths,
    stop: Arc<AtomicBool>,
    exit: Arc<Latch<i32>>,
}

impl RemoteTaskHandle {
    pub fn output_dir(&self) -> &Path {
        &self.output.dir
    }
}

/// Dropping a running handle closes its channel, which hangs up the remote command.
impl Drop for RemoteTaskHandle {
    fn drop(&mut self) {
        if self.exit.is_set() {
            return;
        }
        warn!("{} dropped while running, closing its channel", self);
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl fmt::Display for RemoteTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Remote {:?} on {}", self.command, self.host)
    }
}

#[async_trait::async_trait]
impl TaskHandle for RemoteTaskHandle {
    async fn stop(&self) -> Result<()> {
        if self.exit.is_set() {
            return Ok(());
        }

        debug!("Hanging up {}", self);
        self.stop.store(true, Ordering::SeqCst);
        match self.exit.wait_timeout(KILL_TIMEOUT).await {
            Some(_) => Ok(()),
            None => Err(ExecutorError::CannotTerminate {
                command: self.command.clone(),
                address: self.host.clone(),
                timeout: KILL_TIMEOUT,
            }),
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
        self.host.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_core::config::ExecutorType;

    #[test]
    fn defaults_point_at_user_ssh_dir() {
        let config = RemoteConfig::new("10.0.0.2");
        assert_eq!(config.port, 22);
        assert!(config.key_path.ends_with(".ssh/id_rsa"));
        assert!(config.known_hosts_path.ends_with(".ssh/known_hosts"));
    }

    #[test]
    fn from_config_overrides_defaults() {
        let mut exec = ExecutorConfig::local("lg");
        exec.executor_type = ExecutorType::Ssh;
        exec.host = Some("10.0.0.3".into());
        exec.port = Some(2222);
        exec.user = Some("bench".into());
        exec.key_path = Some("/keys/bench".into());

        let config = RemoteConfig::from_config(&exec).unwrap();
        assert_eq!(config.host, "10.0.0.3");
        assert_eq!(config.port, 2222);
        assert_eq!(config.user, "bench");
        assert_eq!(config.key_path, PathBuf::from("/keys/bench"));
    }

    #[test]
    fn from_config_requires_host() {
        let exec = ExecutorConfig::local("lg");
        assert!(matches!(
            RemoteConfig::from_config(&exec),
            Err(ExecutorError::Config(_))
        ));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/key"), home.join(".ssh/key"));
        }
        assert_eq!(expand_home("/abs/key"), PathBuf::from("/abs/key"));
    }
}
