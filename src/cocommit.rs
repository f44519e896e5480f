//! Co-committed file extraction
//!
//! A commit that flips a bead to claimed/closed usually carries the code that
//! did the work. This module lists those files and scores the link.

use crate::error::Result;
use crate::git::GitRunner;
use crate::types::{short_sha, BeadEvent, CorrelatedCommit, CorrelationMethod, FileChange};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

lazy_static! {
    /// Brace rename notation in numstat output: `pkg/{old => new}/file.go`
    static ref RENAME_BRACES: Regex = Regex::new(r"\{[^}]* => ([^}]*)\}").unwrap();
}

/// Extensions treated as source, config, or docs
const CODE_EXTENSIONS: &[&str] = &[
    "go", "py", "js", "ts", "jsx", "tsx", "rs", "java", "kt", "swift", "c", "cpp", "h", "hpp", "rb", "php",
    "cs", "scala", "yaml", "yml", "json", "toml", "md", "sql", "sh", "bash", "zsh",
];

/// Path prefixes that never count as work product
const EXCLUDED_PREFIXES: &[&str] = &[
    ".beads/",
    ".bv/",
    ".git/",
    "node_modules/",
    "vendor/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "dist/",
    "build/",
    ".next/",
];

const TEST_PATTERNS: &[&str] = &["_test.go", ".test.js", ".test.ts", ".spec.js", ".spec.ts", "_test.py", "test_"];

/// Commits with more files than this are treated as shotgun commits
const SHOTGUN_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LineStats {
    insertions: usize,
    deletions: usize,
}

/// Extracts files changed in the same commit as a bead status change
#[derive(Debug, Clone)]
pub struct CoCommitExtractor {
    git: GitRunner,
}

impl CoCommitExtractor {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_runner(GitRunner::new(repo_path))
    }

    pub fn with_runner(git: GitRunner) -> Self {
        Self { git }
    }

    /// Code files changed by the event's commit, with line counts when available
    pub fn extract_co_committed_files(&self, event: &BeadEvent) -> Result<Vec<FileChange>> {
        let name_status = self
            .git
            .run(&["show", "--name-status", "--format=", event.commit_sha.as_str()])?;
        let files = parse_name_status(&name_status);

        let stats = match self
            .git
            .run(&["show", "--numstat", "--format=", event.commit_sha.as_str()])
        {
            Ok(out) => parse_numstat(&out),
            Err(e) => {
                tracing::debug!(sha = %event.commit_sha, error = %e, "numstat unavailable");
                HashMap::new()
            }
        };

        Ok(files
            .into_iter()
            .filter(|f| is_code_file(&f.path) && !is_excluded_path(&f.path))
            .map(|mut f| {
                if let Some(s) = stats.get(&f.path) {
                    f.insertions = s.insertions;
                    f.deletions = s.deletions;
                }
                f
            })
            .collect())
    }

    /// Score a co-commit link and wrap it as a correlated commit
    pub fn create_correlated_commit(&self, event: &BeadEvent, files: Vec<FileChange>) -> CorrelatedCommit {
        let confidence = calculate_confidence(event, &files);
        let reason = generate_reason(event, &files);

        CorrelatedCommit {
            bead_id: event.bead_id.clone(),
            sha: event.commit_sha.clone(),
            short_sha: short_sha(&event.commit_sha),
            message: event.commit_msg.clone(),
            author: event.author.clone(),
            author_email: event.author_email.clone(),
            timestamp: event.timestamp,
            files,
            method: CorrelationMethod::CoCommitted,
            confidence,
            reason,
        }
    }

    /// Co-commit correlations for every claimed/closed event.
    ///
    /// File lists are fetched once per SHA. Commits whose lookup fails or that
    /// touch no code files are skipped.
    pub fn extract_all_co_commits(&self, events: &[BeadEvent]) -> Vec<CorrelatedCommit> {
        let mut commits = Vec::new();
        let mut file_cache: HashMap<String, Vec<FileChange>> = HashMap::new();

        for event in events.iter().filter(|e| e.event_type.is_status_change()) {
            let files = match file_cache.get(&event.commit_sha) {
                Some(files) => files.clone(),
                None => match self.extract_co_committed_files(event) {
                    Ok(files) => {
                        file_cache.insert(event.commit_sha.clone(), files.clone());
                        files
                    }
                    Err(e) => {
                        tracing::debug!(sha = %event.commit_sha, error = %e, "skipping co-commit lookup");
                        continue;
                    }
                },
            };

            if files.is_empty() {
                continue;
            }
            commits.push(self.create_correlated_commit(event, files));
        }

        tracing::debug!(commits = commits.len(), "extracted co-committed correlations");
        commits
    }
}

/// Parse `git show --name-status` output. Renames resolve to the new path.
fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                return None;
            }
            let status = parts[0];
            let path = if parts.len() >= 3 && (status.starts_with('R') || status.starts_with('C')) {
                parts[2]
            } else {
                parts[1]
            };
            let action: String = status.chars().take(1).collect();

            Some(FileChange {
                path: path.to_string(),
                action,
                insertions: 0,
                deletions: 0,
            })
        })
        .collect()
}

/// Parse `git show --numstat` output keyed by post-rename path. Binary files count 0.
fn parse_numstat(output: &str) -> HashMap<String, LineStats> {
    let mut stats = HashMap::new();

    for line in output.lines().filter(|l| !l.is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let (Some(ins), Some(del), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };

        let path = if path.contains(" => ") {
            extract_new_path(path)
        } else {
            path.to_string()
        };

        stats.insert(
            path,
            LineStats {
                insertions: ins.parse().unwrap_or(0),
                deletions: del.parse().unwrap_or(0),
            },
        );
    }

    stats
}

/// Resolve `old => new` and `pre/{old => new}/post` to the new path
fn extract_new_path(path: &str) -> String {
    if path.contains('{') {
        let replaced = RENAME_BRACES.replace_all(path, "$1").into_owned();
        // `{ => sub}` leaves a doubled slash behind
        return replaced.replace("//", "/");
    }

    match path.find(" => ") {
        Some(idx) => path[idx + 4..].to_string(),
        None => path.to_string(),
    }
}

/// Raw confidence in [0, 1]; the method range clamp happens when the commit is built
pub fn calculate_confidence(event: &BeadEvent, files: &[FileChange]) -> f64 {
    let mut confidence = 0.95;

    if contains_bead_id(&event.commit_msg, &event.bead_id) {
        confidence += 0.04;
    }
    if files.len() > SHOTGUN_THRESHOLD {
        confidence -= 0.10;
    }
    if all_test_files(files) {
        confidence -= 0.05;
    }

    f64::clamp(confidence, 0.0, 1.0)
}

fn generate_reason(event: &BeadEvent, files: &[FileChange]) -> String {
    let mut parts = vec![format!(
        "Co-committed with bead status change to {}",
        event.event_type
    )];

    if contains_bead_id(&event.commit_msg, &event.bead_id) {
        parts.push("commit message references bead ID".to_string());
    }
    if files.len() > SHOTGUN_THRESHOLD {
        parts.push(format!("large commit ({} files)", files.len()));
    }
    if all_test_files(files) {
        parts.push("contains only test files".to_string());
    }

    parts.join("; ")
}

pub fn is_code_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| CODE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_excluded_path(path: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn contains_bead_id(text: &str, bead_id: &str) -> bool {
    !bead_id.is_empty() && text.to_lowercase().contains(&bead_id.to_lowercase())
}

fn all_test_files(files: &[FileChange]) -> bool {
    !files.is_empty()
        && files.iter().all(|f| {
            let lower = f.path.to_lowercase();
            TEST_PATTERNS.iter().any(|p| lower.contains(p))
        })
}
