//! Command decorators: string-to-string transforms that put a shell command
//! under an isolation or multiplicity policy. The cgroups themselves are
//! created elsewhere; these only prefix the command that joins them.

use crate::util::shell_escape;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub trait Decorator: Send + Sync + fmt::Debug {
    fn decorate(&self, command: &str) -> String;
}

/// Ordered decorator chain. The first decorator is applied first, so the
/// last one ends up outermost.
#[derive(Debug, Clone, Default)]
pub struct Decorators(Vec<Arc<dyn Decorator>>);

impl Decorators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, decorator: impl Decorator + 'static) -> Self {
        self.0.push(Arc::new(decorator));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Decorator for Decorators {
    fn decorate(&self, command: &str) -> String {
        self.0
            .iter()
            .fold(command.to_string(), |cmd, d| d.decorate(&cmd))
    }
}

impl FromIterator<Arc<dyn Decorator>> for Decorators {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Decorator>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Runs the command inside an existing cgroup through `cgexec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    controller: String,
    path: String,
}

impl Cgroup {
    pub fn new(controller: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            path: path.into(),
        }
    }

    pub fn cpuset(path: impl Into<String>) -> Self {
        Self::new("cpuset", path)
    }

    pub fn cpu_shares(path: impl Into<String>) -> Self {
        Self::new("cpu", path)
    }

    pub fn memory(path: impl Into<String>) -> Self {
        Self::new("memory", path)
    }
}

impl Decorator for Cgroup {
    fn decorate(&self, command: &str) -> String {
        format!("cgexec -g {}:{} {}", self.controller, self.path, command)
    }
}

/// Runs the command as PID 1 of a fresh PID namespace, so killing it takes
/// every descendant down too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PidNamespace;

impl Decorator for PidNamespace {
    fn decorate(&self, command: &str) -> String {
        format!("unshare --pid --fork --mount-proc {}", command)
    }
}

/// Runs `count` replicas of the command with GNU parallel.
///
/// Replica output is interleaved in the same stdout/stderr. The whole fan-out
/// is wrapped in a PID namespace so it can be killed as one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallel {
    count: usize,
}

impl Parallel {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Decorator for Parallel {
    fn decorate(&self, command: &str) -> String {
        let replicas = (1..=self.count)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let fanned = format!(
            "parallel -j {} sh -c {} -- ::: {}",
            self.count,
            shell_escape(command),
            replicas
        );
        let decorated = PidNamespace.decorate(&fanned);
        debug!("Parallelized command prepared: {:?}", decorated);
        decorated
    }
}

/// Pins the command to CPUs with `taskset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taskset {
    cpus: Vec<usize>,
}

impl Taskset {
    pub fn new(cpus: Vec<usize>) -> Self {
        Self { cpus }
    }
}

impl Decorator for Taskset {
    fn decorate(&self, command: &str) -> String {
        let list = if self.cpus.is_empty() {
            "0".to_string()
        } else {
            join_ids(&self.cpus)
        };
        format!("taskset -c {} {}", list, command)
    }
}

/// NUMA placement through `numactl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Numactl {
    pub all: bool,
    pub local_alloc: bool,
    pub interleave: Vec<usize>,
    pub membind: Vec<usize>,
    pub cpunodebind: Vec<usize>,
    pub physcpubind: Vec<usize>,
    pub preferred: Option<usize>,
}

impl Decorator for Numactl {
    fn decorate(&self, command: &str) -> String {
        let mut options = Vec::new();
        if self.all {
            options.push("-a".to_string());
        }
        if self.local_alloc {
            options.push("-l".to_string());
        }
        if !self.interleave.is_empty() {
            options.push(format!("-i {}", join_ids(&self.interleave)));
        }
        if !self.membind.is_empty() {
            options.push(format!("-m {}", join_ids(&self.membind)));
        }
        if !self.physcpubind.is_empty() {
            options.push(format!("-C {}", join_ids(&self.physcpubind)));
        }
        if !self.cpunodebind.is_empty() {
            options.push(format!("-N {}", join_ids(&self.cpunodebind)));
        }
        if let Some(node) = self.preferred {
            options.push(format!("--preferred={}", node));
        }
        format!("numactl {} -- {}", options.join(" "), command)
    }
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgroup_prefixes() {
        assert_eq!(
            Cgroup::cpuset("/hp").decorate("memcached -p 11211"),
            "cgexec -g cpuset:/hp memcached -p 11211"
        );
        assert_eq!(Cgroup::cpu_shares("be").decorate("x"), "cgexec -g cpu:be x");
        assert_eq!(Cgroup::memory("be").decorate("x"), "cgexec -g memory:be x");
    }

    #[test]
    fn chain_applies_in_order() {
        let chain = Decorators::new()
            .push(Cgroup::cpuset("a"))
            .push(PidNamespace);
        assert_eq!(
            chain.decorate("sleep 1"),
            "unshare --pid --fork --mount-proc cgexec -g cpuset:a sleep 1"
        );
        assert_eq!(Decorators::new().decorate("sleep 1"), "sleep 1");
    }

    #[test]
    fn parallel_replicates_under_namespace() {
        assert_eq!(
            Parallel::new(3).decorate("echo 'hi'"),
            "unshare --pid --fork --mount-proc parallel -j 3 sh -c 'echo '\\''hi'\\''' -- ::: 1 2 3"
        );
    }

    #[test]
    fn taskset_and_numactl() {
        assert_eq!(Taskset::new(vec![1, 3]).decorate("x"), "taskset -c 1,3 x");
        assert_eq!(Taskset::new(vec![]).decorate("x"), "taskset -c 0 x");

        let numa = Numactl {
            membind: vec![0],
            physcpubind: vec![2, 4],
            ..Default::default()
        };
        assert_eq!(numa.decorate("x"), "numactl -m 0 -C 2,4 -- x");
    }
}
