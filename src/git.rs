//! Git subprocess execution
//!
//! Every git call in the crate goes through `GitRunner::run`, which captures
//! stdout/stderr and enforces an optional wall-clock timeout.

use crate::error::{CorrelationError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default per-invocation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs git commands inside one repository
#[derive(Debug, Clone)]
pub struct GitRunner {
    repo_path: PathBuf,
    timeout: Option<Duration>,
}

impl GitRunner {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Override the timeout; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `git <args>` and return stdout.
    ///
    /// Non-zero exit becomes `CommandFailed` carrying trimmed stderr; exceeding
    /// the timeout kills the child and returns `Timeout`.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let command = args.join(" ");
        tracing::trace!(repo = %self.repo_path.display(), %command, "running git");

        let mut child = Command::new("git")
            .args(&args)
            .current_dir(&self.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes on their own threads so a chatty child never blocks
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || drain(stdout));
        let err_reader = thread::spawn(move || drain(stderr));

        let status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!(%command, ?timeout, "git command timed out");
                        return Err(CorrelationError::Timeout { command, timeout });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            tracing::debug!(%command, %stderr, "git command failed");
            return Err(CorrelationError::CommandFailed { command, stderr });
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Full SHA of HEAD
    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }
}

fn drain<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut source) = source {
        let _ = source.read_to_end(&mut buf);
    }
    buf
}
