use crate::handle::{SharedTaskHandle, TaskHandle};
use std::sync::{Arc, Mutex, Weak};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Registry of live task handles, stopped in reverse creation order when
/// the orchestrator is interrupted.
///
/// The guard holds weak references only: a handle dropped by its owner
/// disappears from the registry, and the executor handles stop their task
/// when dropped while it still runs. Clones share the same registry.
#[derive(Clone, Default)]
pub struct InterruptGuard {
    handles: Arc<Mutex<Vec<Weak<dyn TaskHandle>>>>,
}

impl InterruptGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a guard and stops everything registered with it on SIGINT or
    /// SIGTERM, then exits the process. Must be called from within a tokio
    /// runtime.
    pub fn install() -> std::io::Result<Self> {
        let guard = Self::new();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let registry = guard.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, stopping all tasks"),
                _ = sigterm.recv() => info!("Received SIGTERM, stopping all tasks"),
            }
            registry.stop_all().await;
            std::process::exit(1);
        });

        debug!("Interrupt guard installed");
        Ok(guard)
    }

    pub fn register(&self, handle: &SharedTaskHandle) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| h.strong_count() > 0);
        handles.push(Arc::downgrade(handle));
    }

    /// Number of registered handles still alive.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<SharedTaskHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Stops every live handle, newest first. Errors are logged.
    pub async fn stop_all(&self) {
        for handle in self.live().into_iter().rev() {
            match handle.stop().await {
                Ok(()) => debug!("Stopped {}", handle),
                Err(e) => warn!("Stopping {} failed: {}", handle, e),
            }
        }
    }
}
