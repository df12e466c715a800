use crate::error::{ErrorCollection, Result};
use crate::handle::{SharedTaskHandle, TaskHandle};
use crate::task::TaskState;
use std::fmt;
use std::fs::File;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error};

/// One master task plus any number of agents.
///
/// The master carries the measurement; agents are auxiliary. Queries go to
/// the master. `stop`, `clean` and `erase_output` fan out to the master and
/// then every agent. When the master terminates inside `wait`, all agents
/// are stopped before `wait` returns.
pub struct ClusterTaskHandle {
    master: SharedTaskHandle,
    agents: Mutex<Vec<SharedTaskHandle>>,
}

impl ClusterTaskHandle {
    pub fn new(master: SharedTaskHandle, agents: Vec<SharedTaskHandle>) -> Self {
        Self {
            master,
            agents: Mutex::new(agents),
        }
    }

    /// Adds an agent; it takes part in every later fan-out.
    pub fn add_agent(&self, agent: SharedTaskHandle) {
        self.agents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(agent);
    }

    pub fn master(&self) -> &SharedTaskHandle {
        &self.master
    }

    pub fn agents(&self) -> Vec<SharedTaskHandle> {
        self.agents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn stop_agents(&self) {
        for agent in self.agents() {
            if let Err(e) = agent.stop().await {
                error!("Cannot stop agent {} of {}: {}", agent, self, e);
            }
        }
    }
}

impl fmt::Display for ClusterTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cluster with master {}", self.master)
    }
}

#[async_trait::async_trait]
impl TaskHandle for ClusterTaskHandle {
    async fn stop(&self) -> Result<()> {
        let mut errors = ErrorCollection::new();
        errors.add(self.master.stop().await);
        for agent in self.agents() {
            errors.add(agent.stop().await);
        }
        errors.into_result()
    }

    fn status(&self) -> TaskState {
        self.master.status()
    }

    fn exit_code(&self) -> Result<i32> {
        self.master.exit_code()
    }

    async fn wait(&self, timeout: Duration) -> Result<bool> {
        let result = self.master.wait(timeout).await;
        match &result {
            Ok(true) | Err(_) => {
                debug!("{}: master done, stopping agents", self);
                self.stop_agents().await;
            }
            Ok(false) => {}
        }
        result
    }

    fn stdout_file(&self) -> Result<File> {
        self.master.stdout_file()
    }

    fn stderr_file(&self) -> Result<File> {
        self.master.stderr_file()
    }

    async fn clean(&self) -> Result<()> {
        let mut errors = ErrorCollection::new();
        errors.add(self.master.clean().await);
        for agent in self.agents() {
            errors.add(agent.clean().await);
        }
        errors.into_result()
    }

    async fn erase_output(&self) -> Result<()> {
        let mut errors = ErrorCollection::new();
        errors.add(self.master.erase_output().await);
        for agent in self.agents() {
            errors.add(agent.erase_output().await);
        }
        errors.into_result()
    }

    fn address(&self) -> String {
        self.master.address()
    }
}
