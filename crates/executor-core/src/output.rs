//! Per-task output directories.
//!
//! Each launched task gets `<cwd>/<prefix>_<binary>_<random>/` holding a
//! `stdout` and a `stderr` file. The executor keeps the write ends until the
//! task terminates; the handle only ever reopens the files read-only.

use crate::error::{ExecutorError, Result};
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const DIRECTORY_MODE: u32 = 0o755;
const OUTPUT_FILE_MODE: u32 = 0o644;

/// Bytes read from the end of a file when tailing it.
const TAIL_WINDOW: u64 = 64 * 1024;

/// Write side of a task's output: the directory plus both open files.
#[derive(Debug)]
pub struct OutputSink {
    paths: OutputPaths,
    pub stdout: File,
    pub stderr: File,
}

/// Read side of a task's output, shared by the handle and its consumers.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl OutputSink {
    /// Creates the output directory under the current working directory.
    pub fn create(prefix: &str, command: &str) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::create_in(&cwd, prefix, command)
    }

    pub fn create_in(base: &Path, prefix: &str, command: &str) -> Result<Self> {
        let binary = binary_name(command)
            .ok_or_else(|| ExecutorError::Message("empty command string".into()))?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let dir = base.join(format!("{}_{}_{}", prefix, binary, &suffix[..8]));
        DirBuilder::new().mode(DIRECTORY_MODE).create(&dir)?;
        // The process umask may have masked bits off.
        fs::set_permissions(&dir, fs::Permissions::from_mode(DIRECTORY_MODE))?;

        let paths = OutputPaths {
            stdout: dir.join("stdout"),
            stderr: dir.join("stderr"),
            dir,
        };

        match open_output_files(&paths) {
            Ok((stdout, stderr)) => {
                debug!(
                    "Created output files: stdout {}, stderr {}",
                    paths.stdout.display(),
                    paths.stderr.display()
                );
                Ok(Self {
                    paths,
                    stdout,
                    stderr,
                })
            }
            Err(e) => {
                let _ = paths.erase();
                Err(e.into())
            }
        }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Syncs and closes both files.
    pub fn close(self) {
        sync_and_close(self.stdout, &self.paths.stdout);
        sync_and_close(self.stderr, &self.paths.stderr);
    }
}

fn open_output_files(paths: &OutputPaths) -> io::Result<(File, File)> {
    let stdout = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(OUTPUT_FILE_MODE)
        .open(&paths.stdout)?;
    let stderr = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(OUTPUT_FILE_MODE)
        .custom_flags(libc::O_SYNC)
        .open(&paths.stderr)?;
    Ok((stdout, stderr))
}

impl OutputPaths {
    pub fn open_stdout(&self) -> Result<File> {
        open_for_reading(&self.stdout)
    }

    pub fn open_stderr(&self) -> Result<File> {
        open_for_reading(&self.stderr)
    }

    /// Removes the directory. Succeeds when it is already gone.
    pub fn erase(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecutorError::Message(format!(
                "removing output directory {} failed: {}",
                self.dir.display(),
                e
            ))),
        }
    }
}

fn open_for_reading(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        ExecutorError::Message(format!("unable to open file at {}: {}", path.display(), e))
    })
}

/// Flushes `file` to disk and drops it, logging failures.
pub fn sync_and_close(file: File, path: &Path) {
    if let Err(e) = file.sync_all() {
        error!("Cannot sync {}: {}", path.display(), e);
    }
}

/// Basename of the first word of a shell command (`/bin/echo x` -> `echo`).
pub fn binary_name(command: &str) -> Option<String> {
    let first = command.split_whitespace().next()?;
    let name = first.rsplit('/').next().unwrap_or(first);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Last `count` lines of the file behind `file`.
pub fn tail_lines(file: &mut File, count: usize) -> io::Result<Vec<String>> {
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(count);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "output-test-{}-{}",
            name,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn binary_name_strips_path_and_args() {
        assert_eq!(binary_name("/bin/echo foo").as_deref(), Some("echo"));
        assert_eq!(binary_name("  sleep inf").as_deref(), Some("sleep"));
        assert_eq!(binary_name(""), None);
    }

    #[test]
    fn sink_layout_and_modes() {
        let base = scratch_dir("layout");
        let sink = OutputSink::create_in(&base, "local", "/bin/echo foobar").unwrap();
        let paths = sink.paths().clone();

        let dir_name = paths.dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(dir_name.starts_with("local_echo_"));
        let mode = fs::metadata(&paths.dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert!(paths.stdout.exists());
        assert!(paths.stderr.exists());

        sink.close();
        paths.erase().unwrap();
        assert!(!paths.dir.exists());
        paths.erase().unwrap();
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn empty_command_is_rejected() {
        let base = scratch_dir("empty");
        assert!(OutputSink::create_in(&base, "local", "   ").is_err());
        assert_eq!(fs::read_dir(&base).unwrap().count(), 0);
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn tail_returns_last_lines() {
        let base = scratch_dir("tail");
        let path = base.join("out");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "one\ntwo\nthree\nfour").unwrap();
        drop(file);

        let mut file = File::open(&path).unwrap();
        assert_eq!(tail_lines(&mut file, 3).unwrap(), vec!["two", "three", "four"]);
        assert_eq!(tail_lines(&mut file, 10).unwrap().len(), 4);
        fs::remove_dir_all(base).unwrap();
    }
}
