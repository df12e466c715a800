use crate::decorator::{Cgroup, Decorator, Decorators, Numactl, Parallel, PidNamespace, Taskset};
use crate::error::Result;
use crate::logutil::DEFAULT_OUTPUT_LINES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level configuration.
/// Loaded from ~/.config/substrate/executors.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub executors: Vec<ExecutorConfig>,
    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub executor_type: ExecutorType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub known_hosts_path: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub pod_name_prefix: Option<String>,
    #[serde(default)]
    pub cpu_request: Option<u64>,
    #[serde(default)]
    pub cpu_limit: Option<u64>,
    #[serde(default)]
    pub memory_request: Option<u64>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub launch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub kubectl: Option<String>,
    #[serde(default)]
    pub decorators: Vec<DecoratorConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    Local,
    Ssh,
    Kubernetes,
}

impl std::fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorType::Local => write!(f, "local"),
            ExecutorType::Ssh => write!(f, "ssh"),
            ExecutorType::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// One entry of an executor's decorator chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecoratorConfig {
    Cpuset { path: String },
    CpuShares { path: String },
    Memory { path: String },
    PidNamespace,
    Parallel { count: usize },
    Taskset { cpus: Vec<usize> },
    Numactl {
        #[serde(default)]
        membind: Vec<usize>,
        #[serde(default)]
        physcpubind: Vec<usize>,
        #[serde(default)]
        interleave: Vec<usize>,
        #[serde(default)]
        cpunodebind: Vec<usize>,
    },
}

impl DecoratorConfig {
    pub fn build(&self) -> Arc<dyn Decorator> {
        match self {
            DecoratorConfig::Cpuset { path } => Arc::new(Cgroup::cpuset(path.clone())),
            DecoratorConfig::CpuShares { path } => Arc::new(Cgroup::cpu_shares(path.clone())),
            DecoratorConfig::Memory { path } => Arc::new(Cgroup::memory(path.clone())),
            DecoratorConfig::PidNamespace => Arc::new(PidNamespace),
            DecoratorConfig::Parallel { count } => Arc::new(Parallel::new(*count)),
            DecoratorConfig::Taskset { cpus } => Arc::new(Taskset::new(cpus.clone())),
            DecoratorConfig::Numactl {
                membind,
                physcpubind,
                interleave,
                cpunodebind,
            } => Arc::new(Numactl {
                membind: membind.clone(),
                physcpubind: physcpubind.clone(),
                interleave: interleave.clone(),
                cpunodebind: cpunodebind.clone(),
                ..Default::default()
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_output_lines_count")]
    pub output_lines_count: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output_lines_count: default_output_lines_count(),
        }
    }
}

fn default_output_lines_count() -> usize {
    DEFAULT_OUTPUT_LINES
}

impl Config {
    /// Load config from the default path (~/.config/substrate/executors.yaml).
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::empty())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("substrate")
            .join("executors.yaml")
    }

    /// Empty config with no executors.
    pub fn empty() -> Self {
        Self {
            executors: Vec::new(),
            defaults: Defaults::default(),
        }
    }

    /// Find an executor config by name.
    pub fn find_executor(&self, name: &str) -> Option<&ExecutorConfig> {
        self.executors.iter().find(|e| e.name == name)
    }
}

impl ExecutorConfig {
    /// A plain local executor without decorators.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor_type: ExecutorType::Local,
            host: None,
            port: None,
            user: None,
            key_path: None,
            known_hosts_path: None,
            namespace: None,
            image: None,
            pod_name_prefix: None,
            cpu_request: None,
            cpu_limit: None,
            memory_request: None,
            memory_limit: None,
            privileged: false,
            host_network: false,
            launch_timeout_secs: None,
            kubectl: None,
            decorators: Vec::new(),
        }
    }

    /// Decorator chain in configured order.
    pub fn decorators(&self) -> Decorators {
        self.decorators.iter().map(DecoratorConfig::build).collect()
    }

    /// Get the SSH port, falling back to 22.
    pub fn ssh_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
executors:
  - name: hp
    type: local
    decorators:
      - kind: cpuset
        path: /hp
      - kind: pid_namespace
  - name: lg
    type: ssh
    host: 10.0.0.2
  - name: k8s
    type: kubernetes
    image: centos:7
    cpu_limit: 2000
    privileged: true
"#;

    #[test]
    fn parses_executors_and_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.executors.len(), 3);
        assert_eq!(config.defaults.output_lines_count, 3);

        let lg = config.find_executor("lg").unwrap();
        assert_eq!(lg.executor_type, ExecutorType::Ssh);
        assert_eq!(lg.ssh_port(), 22);

        let k8s = config.find_executor("k8s").unwrap();
        assert_eq!(k8s.cpu_limit, Some(2000));
        assert!(k8s.privileged);
        assert!(config.find_executor("missing").is_none());
    }

    #[test]
    fn builds_decorator_chain_in_order() {
        let config = Config::parse(SAMPLE).unwrap();
        let chain = config.find_executor("hp").unwrap().decorators();
        assert_eq!(chain.len(), 2);
        assert_eq!(
            chain.decorate("memcached"),
            "unshare --pid --fork --mount-proc cgexec -g cpuset:/hp memcached"
        );
    }
}
