use executor_core::error::{ExecutorError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Thin wrapper over the `kubectl` binary, scoped to one namespace.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    namespace: String,
}

impl Kubectl {
    pub fn new(binary: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            namespace: namespace.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).args(["--namespace", &self.namespace]);
        cmd
    }

    /// Run kubectl, optionally feeding `stdin`, and return stdout.
    pub async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        debug!("Running: {} {}", self.binary, args.join(" "));

        let mut child = self
            .command(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExecutorError::Kubernetes(format!("Failed to run {}: {}", self.binary, e))
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe sends EOF.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Kubernetes(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    pub async fn create(&self, manifest: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(manifest)?;
        self.run(&["create", "-f", "-"], Some(&body)).await?;
        Ok(())
    }

    /// Requests deletion with a 1 s grace period without waiting for it.
    pub async fn delete_pod(&self, pod: &str) -> Result<()> {
        self.run(&delete_args(pod), None).await?;
        Ok(())
    }

    /// Fires a delete request without a runtime and without reaping it.
    pub fn delete_pod_detached(&self, pod: &str) -> Result<()> {
        std::process::Command::new(&self.binary)
            .args(delete_args(pod))
            .args(["--namespace", &self.namespace])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ExecutorError::Kubernetes(format!("Failed to run {}: {}", self.binary, e))
            })?;
        Ok(())
    }

    pub async fn logs(&self, pod: &str) -> Result<Vec<u8>> {
        self.run(&["logs", pod], None).await
    }

    /// Whether the pod object still exists.
    pub async fn pod_exists(&self, pod: &str) -> Result<bool> {
        let out = self
            .run(&["get", "pod", pod, "--ignore-not-found", "-o", "name"], None)
            .await?;
        Ok(!String::from_utf8_lossy(&out).trim().is_empty())
    }

    /// Long-running watch on pods labelled `name=<pod>`, one JSON event per change.
    pub fn watch(&self, pod: &str) -> Command {
        let selector = format!("name={}", pod);
        let mut cmd = self.command(&[
            "get",
            "pods",
            "-l",
            &selector,
            "--watch",
            "--output-watch-events",
            "-o",
            "json",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

fn delete_args(pod: &str) -> [&str; 6] {
    [
        "delete",
        "pod",
        pod,
        "--grace-period=1",
        "--wait=false",
        "--ignore-not-found",
    ]
}
