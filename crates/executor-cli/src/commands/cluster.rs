use crate::commands::{finish, timestamp};
use crate::dispatch;
use executor_core::config::Config;
use executor_core::{ClusterTaskHandle, InterruptGuard, SharedTaskHandle};
use std::sync::Arc;

pub async fn run(
    config: &Config,
    guard: &InterruptGuard,
    executor_name: &str,
    master: &str,
    agents: &[String],
    timeout: Option<u64>,
    keep_output: bool,
) -> anyhow::Result<()> {
    let executor = dispatch::create_executor(config, executor_name, guard)?;

    // Agents first, so they are up by the time the master needs them.
    let mut agent_handles = Vec::with_capacity(agents.len());
    for agent in agents {
        let handle = executor.execute(agent).await?;
        println!("[{}] Agent running: {}", timestamp(), handle);
        agent_handles.push(handle);
    }

    let master_handle = executor.execute(master).await?;
    println!("[{}] Master running: {}", timestamp(), master_handle);

    let cluster: SharedTaskHandle = Arc::new(ClusterTaskHandle::new(master_handle, agent_handles));
    guard.register(&cluster);

    let code = finish(
        cluster.as_ref(),
        timeout,
        keep_output,
        config.defaults.output_lines_count,
    )
    .await?;
    if code != 0 {
        anyhow::bail!("{} exited with code {}", cluster, code);
    }
    Ok(())
}
