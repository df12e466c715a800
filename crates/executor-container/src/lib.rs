mod container_executor;
mod kubectl;
pub mod manifest;
pub mod watch;

pub use container_executor::{KubernetesConfig, KubernetesExecutor, KubernetesTaskHandle};
