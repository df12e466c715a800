use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("launching {command:?} on {address} failed: {cause}")]
    LaunchFailed {
        command: String,
        address: String,
        cause: String,
    },

    #[error("task {command:?} is not terminated")]
    NotTerminated { command: String },

    #[error("cannot terminate {command:?} on {address}: still running after {timeout:?}")]
    CannotTerminate {
        command: String,
        address: String,
        timeout: Duration,
    },

    #[error("service {command:?} has terminated prematurely")]
    ServiceStopped { command: String },

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<ExecutorError>),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

impl ExecutorError {
    pub fn launch_failed(
        command: impl Into<String>,
        address: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        ExecutorError::LaunchFailed {
            command: command.into(),
            address: address.into(),
            cause: cause.to_string(),
        }
    }
}

fn join_messages(errors: &[ExecutorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates errors from fan-out operations in invocation order.
#[derive(Debug, Default)]
pub struct ErrorCollection {
    errors: Vec<ExecutorError>,
}

impl ErrorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the error of `result`, if any.
    pub fn add(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing was collected, otherwise a single `Aggregate`.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::Aggregate(self.errors))
        }
    }
}
