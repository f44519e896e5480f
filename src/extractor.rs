//! Bead lifecycle event extraction from git history
//!
//! Runs `git log -p --follow` over the bead storage file and turns each
//! commit's diff into created/claimed/closed/reopened/modified events.
//!
//! Only `-{` / `+{` diff lines are looked at. Each is decoded as a minimal
//! (id, status, title) snapshot; anything that does not decode is noise and
//! is dropped. Deleted beads produce no event.

use crate::error::Result;
use crate::git::GitRunner;
use crate::types::{BeadEvent, EventType, ExtractOptions, BEADS_FILE};
use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

lazy_static! {
    /// Start of a commit header in our `--format`
    static ref COMMIT_HEADER: Regex = Regex::new(r"(?m)^[0-9a-f]{40}\|").unwrap();
}

/// Log format: SHA | strict ISO-8601 author date | author | email | subject
pub(crate) const LOG_FORMAT: &str = "--format=%H|%aI|%an|%ae|%s";

/// Parsed commit header
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommitInfo {
    pub sha: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub author_email: String,
    pub message: String,
}

/// A bead's state at one side of a diff
#[derive(Debug, Clone, Deserialize)]
struct BeadSnapshot {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
}

/// Extracts bead lifecycle events from git history
#[derive(Debug, Clone)]
pub struct Extractor {
    git: GitRunner,
    beads_file: String,
}

impl Extractor {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_runner(GitRunner::new(repo_path))
    }

    pub fn with_runner(git: GitRunner) -> Self {
        Self {
            git,
            beads_file: BEADS_FILE.to_string(),
        }
    }

    /// Extract lifecycle events in chronological order
    pub fn extract(&self, opts: &ExtractOptions) -> Result<Vec<BeadEvent>> {
        let args = self.build_log_args(opts);
        let output = self.git.run(&args)?;

        let events = parse_log_output(&output, opts.bead_id.as_deref());
        tracing::debug!(events = events.len(), "extracted bead events");
        Ok(events)
    }

    /// Extract all events for one bead
    pub fn extract_for_bead(&self, bead_id: &str, opts: &ExtractOptions) -> Result<Vec<BeadEvent>> {
        let opts = ExtractOptions {
            bead_id: Some(bead_id.to_string()),
            ..opts.clone()
        };
        self.extract(&opts)
    }

    fn build_log_args(&self, opts: &ExtractOptions) -> Vec<String> {
        let mut args = vec![
            "log".to_string(),
            "-p".to_string(),
            // --follow needs exactly one pathspec, so only the canonical file is tracked
            "--follow".to_string(),
            LOG_FORMAT.to_string(),
        ];
        args.extend(filter_args(opts));
        if let Some(range) = &opts.range {
            args.push(range.clone());
        }
        args.push("--".to_string());
        args.push(self.beads_file.clone());
        args
    }
}

/// `--since`/`--until`/`-nN` arguments shared by every history query
pub(crate) fn filter_args(opts: &ExtractOptions) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(since) = opts.since {
        args.push(format!("--since={}", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    if let Some(until) = opts.until {
        args.push(format!("--until={}", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    if opts.limit > 0 {
        args.push(format!("-n{}", opts.limit));
    }
    args
}

/// Parse combined header + diff output (newest first) into chronological events
pub(crate) fn parse_log_output(output: &str, filter_bead_id: Option<&str>) -> Vec<BeadEvent> {
    let mut per_commit: Vec<Vec<BeadEvent>> = Vec::new();

    for segment in split_by_commits(output) {
        let Some((header, diff)) = segment.split_once('\n') else {
            continue;
        };
        let Some(info) = parse_commit_info(header) else {
            tracing::trace!(header, "skipping malformed commit header");
            continue;
        };
        per_commit.push(parse_diff(diff, &info, filter_bead_id));
    }

    // git log is newest first
    per_commit.into_iter().rev().flatten().collect()
}

/// Split log output at each commit header line
pub(crate) fn split_by_commits(output: &str) -> Vec<&str> {
    let starts: Vec<usize> = COMMIT_HEADER.find_iter(output).map(|m| m.start()).collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(output.len());
            &output[start..end]
        })
        .collect()
}

/// Parse `SHA|date|author|email|subject`. The subject may itself contain `|`.
pub(crate) fn parse_commit_info(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(5, '|');
    let sha = parts.next()?;
    let date = parts.next()?;
    let author = parts.next()?;
    let author_email = parts.next()?;
    let message = parts.next()?;

    let timestamp = DateTime::parse_from_rfc3339(date.trim()).ok()?.with_timezone(&Utc);

    Some(CommitInfo {
        sha: sha.to_string(),
        timestamp,
        author: author.to_string(),
        author_email: author_email.to_string(),
        message: message.trim_end_matches('\r').to_string(),
    })
}

fn parse_snapshot(json: &str) -> Option<BeadSnapshot> {
    let snap: BeadSnapshot = serde_json::from_str(json).ok()?;
    if snap.id.is_empty() {
        return None;
    }
    Some(snap)
}

/// Compare old/new snapshots in one commit's diff and emit events sorted by bead ID
fn parse_diff(diff: &str, info: &CommitInfo, filter_bead_id: Option<&str>) -> Vec<BeadEvent> {
    let mut old_beads: BTreeMap<String, BeadSnapshot> = BTreeMap::new();
    let mut new_beads: BTreeMap<String, BeadSnapshot> = BTreeMap::new();

    for line in diff.lines() {
        let (side, json) = if let Some(json) = line.strip_prefix("-{") {
            (&mut old_beads, json)
        } else if let Some(json) = line.strip_prefix("+{") {
            (&mut new_beads, json)
        } else {
            continue;
        };

        let Some(snap) = parse_snapshot(&format!("{{{}", json)) else {
            continue;
        };
        if filter_bead_id.is_some_and(|id| id != snap.id) {
            continue;
        }
        side.insert(snap.id.clone(), snap);
    }

    let mut events = Vec::new();
    for (bead_id, new_snap) in &new_beads {
        let event_type = match old_beads.get(bead_id) {
            None => EventType::Created,
            Some(old) if old.status == new_snap.status => EventType::Modified,
            Some(old) => determine_status_event(&old.status, &new_snap.status),
        };

        events.push(BeadEvent {
            bead_id: bead_id.clone(),
            event_type,
            timestamp: info.timestamp,
            commit_sha: info.sha.clone(),
            commit_msg: info.message.clone(),
            author: info.author.clone(),
            author_email: info.author_email.clone(),
        });
    }

    events
}

/// Event type for a status transition
pub(crate) fn determine_status_event(old_status: &str, new_status: &str) -> EventType {
    match new_status {
        "in_progress" => EventType::Claimed,
        "closed" => EventType::Closed,
        "open" if old_status == "closed" => EventType::Reopened,
        _ => EventType::Modified,
    }
}
