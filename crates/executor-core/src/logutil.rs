use crate::handle::TaskHandle;
use crate::output::tail_lines;
use tracing::{debug, error};

/// Lines of stdout/stderr dumped when a task ends unexpectedly.
pub const DEFAULT_OUTPUT_LINES: usize = 3;

/// Dumps the tail of both output streams and the exit code at error level.
pub fn log_output(handle: &dyn TaskHandle, lines: usize) {
    error!(
        "Task {} on {} might have ended prematurely",
        handle,
        handle.address()
    );
    log_stream("stdout", handle.stdout_file(), handle, lines);
    log_stream("stderr", handle.stderr_file(), handle, lines);

    match handle.exit_code() {
        Ok(code) => error!("{}: exit code {}", handle, code),
        Err(e) => error!("{}: could not read exit code: {}", handle, e),
    }
}

fn log_stream(
    stream: &str,
    file: crate::error::Result<std::fs::File>,
    handle: &dyn TaskHandle,
    lines: usize,
) {
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            error!("{}: cannot retrieve {} file: {}", handle, stream, e);
            return;
        }
    };

    match tail_lines(&mut file, lines) {
        Ok(tail) if tail.is_empty() => error!("{}: {} is empty", handle, stream),
        Ok(tail) => {
            error!("{}: last {} lines of {}:", handle, lines, stream);
            for line in tail {
                error!("{}: {}", handle, line);
            }
        }
        Err(e) => error!("{}: tailing {} failed: {}", handle, stream, e),
    }
}

/// Records a normal completion at debug level.
pub fn log_successful_execution(handle: &dyn TaskHandle) {
    match handle.exit_code() {
        Ok(code) => debug!("{} on {} has ended, exit code {}", handle, handle.address(), code),
        Err(e) => debug!("{} on {} has ended, exit code unavailable: {}", handle, handle.address(), e),
    }
}
