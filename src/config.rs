//! Configuration file support for history correlation
//!
//! Reads from .beads/correlation.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Git subprocess settings
    #[serde(default)]
    pub git: GitConfig,

    /// Report cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Correlation tuning
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

/// Git subprocess configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GitConfig {
    /// Seconds before a git invocation is killed (0 disables the timeout)
    /// Default: 60
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Report cache configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Seconds an entry stays fresh
    /// Default: 300
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Max cached reports
    /// Default: 10
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

/// Correlation tuning
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CorrelationConfig {
    /// New-commit count above which an incremental update becomes a full refresh
    /// Default: 100
    #[serde(default = "default_incremental_threshold")]
    pub incremental_threshold: usize,

    /// Default minimum confidence for correlated commits
    /// Default: 0.0 (keep everything)
    #[serde(default)]
    pub min_confidence: f64,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_max_size() -> usize {
    10
}

fn default_incremental_threshold() -> usize {
    100
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_size: default_max_size(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            incremental_threshold: default_incremental_threshold(),
            min_confidence: 0.0,
        }
    }
}

impl Config {
    /// Load config from .beads/correlation.toml, searching upward from `start`.
    /// Returns default config if the file doesn't exist or doesn't parse.
    pub fn load(start: &Path) -> Self {
        if let Some(path) = Self::find_config_path(start) {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config")
                    }
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot read config"),
            }
        }
        Self::default()
    }

    /// Find correlation.toml by walking up directory tree
    fn find_config_path(start: &Path) -> Option<PathBuf> {
        let mut dir = start;

        loop {
            let config_path = dir.join(".beads").join("correlation.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Git timeout, `None` when disabled
    pub fn git_timeout(&self) -> Option<Duration> {
        match self.git.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_secs)
    }
}
