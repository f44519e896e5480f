//! Error type for history correlation
//!
//! Only subprocess failures and a missing repository/beads file are fatal.
//! Malformed history is skipped at the call site, never turned into an error.

use std::path::PathBuf;
use std::time::Duration;

/// Error type for correlation operations
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("Command 'git {command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command 'git {command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("Beads file not found: {}", .0.display())]
    BeadsFileMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CorrelationError {
    /// True for errors raised by the git subprocess itself (exit status or timeout)
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            CorrelationError::CommandFailed { .. } | CorrelationError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CorrelationError>;
