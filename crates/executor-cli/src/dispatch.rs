use executor_core::config::{Config, ExecutorConfig, ExecutorType};
use executor_core::error::ExecutorError;
use executor_core::{Executor, InterruptGuard};
use executor_local::LocalExecutor;
use std::sync::Arc;

/// Create an executor instance from config by name. `local` resolves to a
/// plain local executor when the config does not define it.
pub fn create_executor(
    config: &Config,
    executor_name: &str,
    guard: &InterruptGuard,
) -> Result<Arc<dyn Executor>, ExecutorError> {
    match config.find_executor(executor_name) {
        Some(exec_config) => create_executor_from_config(exec_config, guard),
        None if executor_name == "local" => {
            create_executor_from_config(&ExecutorConfig::local("local"), guard)
        }
        None => Err(ExecutorError::Config(format!(
            "executor {:?} is not configured",
            executor_name
        ))),
    }
}

/// Create an executor from an ExecutorConfig.
pub fn create_executor_from_config(
    exec_config: &ExecutorConfig,
    guard: &InterruptGuard,
) -> Result<Arc<dyn Executor>, ExecutorError> {
    let guard = guard.clone();
    match exec_config.executor_type {
        ExecutorType::Local => Ok(Arc::new(
            LocalExecutor::from_config(exec_config).with_guard(guard),
        )),
        ExecutorType::Ssh => Ok(Arc::new(
            executor_ssh::RemoteExecutor::from_config(exec_config)?.with_guard(guard),
        )),
        ExecutorType::Kubernetes => Ok(Arc::new(
            executor_container::KubernetesExecutor::from_config(exec_config).with_guard(guard),
        )),
    }
}
