use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Exit code reported for a task that was killed by a signal.
pub const KILLED_BY_SIGNAL: i32 = -1;

/// Passing this to `wait` blocks until the task terminates.
pub const WAIT_FOREVER: Duration = Duration::ZERO;

/// How long `stop` waits for a signalled task before giving up.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote runtimes report signal deaths as `128 + signo` (SIGHUP, SIGKILL).
pub fn is_killed_by_signal(code: i32) -> bool {
    matches!(code, KILLED_BY_SIGNAL | 129 | 137)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Terminated,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Running => write!(f, "running"),
            TaskState::Terminated => write!(f, "terminated"),
        }
    }
}

/// One-shot broadcast cell: set once, observed by any number of waiters.
///
/// Every task handle publishes its termination through one of these, so
/// concurrent `wait` callers all unblock together and a value set once is
/// never replaced.
#[derive(Debug)]
pub struct Latch<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Sets the value. Returns `false` if it was already set.
    pub fn set(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = value.take();
                true
            } else {
                false
            }
        })
    }

    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // The sender lives in `self`, so the channel stays open while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Waits at most `timeout` (`WAIT_FOREVER` for no bound).
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return Some(self.wait().await);
        }
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_codes() {
        assert!(is_killed_by_signal(-1));
        assert!(is_killed_by_signal(129));
        assert!(is_killed_by_signal(137));
        assert!(!is_killed_by_signal(0));
        assert!(!is_killed_by_signal(127));
    }

    #[test]
    fn latch_keeps_first_value() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.set(3));
        assert!(!latch.set(4));
        assert_eq!(latch.get(), Some(3));
    }

    #[tokio::test]
    async fn latch_times_out_when_unset() {
        let latch: Latch<i32> = Latch::new();
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn latch_releases_every_waiter() {
        let latch = Arc::new(Latch::new());
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                tokio::spawn(async move { latch.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        latch.set(7);

        for waiter in waiters {
            let value = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(value, 7);
        }
    }
}
