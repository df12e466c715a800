pub mod chained;
pub mod cluster;
pub mod config;
pub mod decorator;
pub mod error;
pub mod executor;
pub mod guard;
pub mod handle;
pub mod logutil;
pub mod output;
pub mod service;
pub mod task;
pub mod util;

pub use chained::ChainedTaskHandle;
pub use cluster::ClusterTaskHandle;
pub use config::Config;
pub use decorator::{Decorator, Decorators};
pub use error::{ExecutorError, Result};
pub use executor::{CommandLauncher, Executor, Launcher, LoadGenerator};
pub use guard::InterruptGuard;
pub use handle::{SharedTaskHandle, TaskHandle};
pub use service::{ServiceHandle, ServiceLauncher};
pub use task::{TaskState, KILLED_BY_SIGNAL, KILL_TIMEOUT, WAIT_FOREVER};
