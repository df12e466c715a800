use crate::commands::{finish, timestamp};
use crate::dispatch;
use executor_core::config::Config;
use executor_core::InterruptGuard;

pub async fn run(
    config: &Config,
    guard: &InterruptGuard,
    executor_name: &str,
    command: &str,
    timeout: Option<u64>,
    keep_output: bool,
) -> anyhow::Result<()> {
    let executor = dispatch::create_executor(config, executor_name, guard)?;

    println!(
        "[{}] Starting {:?} on {} ({})",
        timestamp(),
        command,
        executor.name(),
        executor.executor_type()
    );
    let handle = executor.execute(command).await?;
    println!("[{}] Running: {} on {}", timestamp(), handle, handle.address());

    let code = finish(
        handle.as_ref(),
        timeout,
        keep_output,
        config.defaults.output_lines_count,
    )
    .await?;
    if code != 0 {
        anyhow::bail!("{:?} exited with code {}", command, code);
    }
    Ok(())
}
