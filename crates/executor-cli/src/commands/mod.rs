pub mod cluster;
pub mod config;
pub mod executors;
pub mod run;

use chrono::Local;
use executor_core::handle::{stop_and_erase_output, TaskHandle};
use executor_core::logutil::{log_output, log_successful_execution};
use executor_core::output::tail_lines;
use executor_core::task::WAIT_FOREVER;
use executor_core::Config;
use std::time::Duration;

pub fn load_config() -> anyhow::Result<Config> {
    Ok(Config::load_default()?)
}

pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Waits for `handle` (stopping it once `timeout` seconds pass), prints the
/// outcome and the tail of stdout, then erases the output unless asked not to.
pub async fn finish(
    handle: &dyn TaskHandle,
    timeout: Option<u64>,
    keep_output: bool,
    lines: usize,
) -> anyhow::Result<i32> {
    let limit = timeout.map(Duration::from_secs).unwrap_or(WAIT_FOREVER);
    if !handle.wait(limit).await? {
        println!("[{}] Timed out after {:?}, stopping {}", timestamp(), limit, handle);
        handle.stop().await?;
    }

    let code = handle.exit_code()?;
    println!("[{}] {} finished with exit code {}", timestamp(), handle, code);
    if code == 0 {
        log_successful_execution(handle);
    } else {
        log_output(handle, lines);
    }

    let mut stdout = handle.stdout_file()?;
    for line in tail_lines(&mut stdout, lines)? {
        println!("  | {}", line);
    }

    if keep_output {
        println!("Output kept on {}", handle.address());
        handle.clean().await?;
    } else {
        // Stopping a terminated task is a no-op.
        stop_and_erase_output(handle).await?;
    }
    Ok(code)
}
