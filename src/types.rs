//! Shared data model for bead history correlation
//!
//! Type Hierarchy:
//!   - Lifecycle: `BeadEvent` -> `BeadMilestones` -> `CycleTime`
//!   - Correlation: `FileChange` -> `CorrelatedCommit`
//!   - Aggregate: `BeadHistory` -> `HistoryReport`
//!
//! Every map in a produced structure is a `BTreeMap` so serialized reports
//! are stable-keyed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Bead storage paths
// =============================================================================

/// Canonical bead storage file, the only path followed across renames
pub const BEADS_FILE: &str = ".beads/beads.jsonl";

// =============================================================================
// Lifecycle events
// =============================================================================

/// Kind of lifecycle transition inferred from a storage diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Claimed,
    Closed,
    Reopened,
    Modified,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Claimed => "claimed",
            EventType::Closed => "closed",
            EventType::Reopened => "reopened",
            EventType::Modified => "modified",
        }
    }

    /// Claimed and closed are the transitions worth correlating code with
    pub fn is_status_change(&self) -> bool {
        matches!(self, EventType::Claimed | EventType::Closed)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event, tied to the commit that recorded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeadEvent {
    pub bead_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub commit_sha: String,
    pub commit_msg: String,
    pub author: String,
    pub author_email: String,
}

// =============================================================================
// Commit correlation
// =============================================================================

/// A file touched by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Single-letter git status: A, M, D, R, ...
    pub action: String,
    pub insertions: usize,
    pub deletions: usize,
}

/// How a commit was linked to a bead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    CoCommitted,
    ExplicitId,
    TemporalAuthor,
}

impl CorrelationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMethod::CoCommitted => "co_committed",
            CorrelationMethod::ExplicitId => "explicit_id",
            CorrelationMethod::TemporalAuthor => "temporal_author",
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit linked to a bead, with a heuristic confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedCommit {
    pub bead_id: String,
    pub sha: String,
    pub short_sha: String,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<FileChange>,
    pub method: CorrelationMethod,
    /// In [0, 1]; a correctness estimate, not a probability
    pub confidence: f64,
    pub reason: String,
}

/// Get short commit hash (7 chars)
pub fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}

// =============================================================================
// Milestones and cycle time
// =============================================================================

/// First/last occurrences of the lifecycle transitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeadMilestones {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<BeadEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed: Option<BeadEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<BeadEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reopened: Option<BeadEvent>,
}

/// Durations between milestones. Only exists once the bead has been closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleTime {
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub claim_to_close: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub create_to_close: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub create_to_claim: Option<Duration>,
}

/// Derive milestones from chronological events.
///
/// Created/claimed keep the first occurrence; closed/reopened keep the latest,
/// so reopen cycles report the final close.
pub fn get_bead_milestones(events: &[BeadEvent]) -> BeadMilestones {
    let mut milestones = BeadMilestones::default();

    for event in events {
        match event.event_type {
            EventType::Created => {
                if milestones.created.is_none() {
                    milestones.created = Some(event.clone());
                }
            }
            EventType::Claimed => {
                if milestones.claimed.is_none() {
                    milestones.claimed = Some(event.clone());
                }
            }
            EventType::Closed => milestones.closed = Some(event.clone()),
            EventType::Reopened => milestones.reopened = Some(event.clone()),
            EventType::Modified => {}
        }
    }

    milestones
}

/// Compute cycle time metrics; `None` until the bead is closed
pub fn calculate_cycle_time(milestones: &BeadMilestones) -> Option<CycleTime> {
    let closed = milestones.closed.as_ref()?;
    let mut ct = CycleTime::default();

    if let Some(claimed) = &milestones.claimed {
        ct.claim_to_close = Some(closed.timestamp - claimed.timestamp);
    }

    if let Some(created) = &milestones.created {
        ct.create_to_close = Some(closed.timestamp - created.timestamp);
        if let Some(claimed) = &milestones.claimed {
            ct.create_to_claim = Some(claimed.timestamp - created.timestamp);
        }
    }

    Some(ct)
}

// =============================================================================
// Histories and reports
// =============================================================================

/// Everything known about one bead's life in git
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeadHistory {
    pub bead_id: String,
    pub title: String,
    pub status: String,
    /// Non-decreasing by timestamp
    pub events: Vec<BeadEvent>,
    pub milestones: BeadMilestones,
    /// Unique by SHA, ordered by (timestamp, sha)
    pub commits: Vec<CorrelatedCommit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_time: Option<CycleTime>,
    pub last_author: String,
}

impl BeadHistory {
    /// Empty history for a bead with no recorded activity yet
    pub fn empty(bead: &BeadInfo) -> Self {
        Self {
            bead_id: bead.id.clone(),
            title: bead.title.clone(),
            status: bead.status.clone(),
            ..Default::default()
        }
    }
}

/// Aggregate statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_beads: usize,
    pub beads_with_commits: usize,
    pub total_commits: usize,
    pub unique_authors: usize,
    pub avg_commits_per_bead: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cycle_time_days: Option<f64>,
    pub method_distribution: BTreeMap<String, usize>,
}

/// Commit SHA -> bead IDs correlated with it
pub type CommitIndex = BTreeMap<String, Vec<String>>;

/// Complete correlation output for a bead set and git range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub generated_at: DateTime<Utc>,
    /// Hash over input (ID, Status) pairs only
    pub data_hash: String,
    pub git_range: String,
    pub latest_commit_sha: String,
    pub stats: HistoryStats,
    pub histories: BTreeMap<String, BeadHistory>,
    pub commit_index: CommitIndex,
}

// =============================================================================
// Inputs
// =============================================================================

/// Minimal bead description supplied by the loader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadInfo {
    pub id: String,
    pub title: String,
    pub status: String,
}

impl BeadInfo {
    pub fn new(id: &str, title: &str, status: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: status.to_string(),
        }
    }
}

/// Options for report generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelatorOptions {
    /// Only commits after this time
    pub since: Option<DateTime<Utc>>,
    /// Only commits before this time
    pub until: Option<DateTime<Utc>>,
    /// Max commits to process (0 = no limit)
    pub limit: usize,
    /// Restrict to a single bead
    pub bead_id: Option<String>,
    /// Drop correlated commits below this confidence (<= 0 keeps everything)
    pub min_confidence: f64,
    /// Skip the per-bead `git log --grep` searches
    pub skip_explicit: bool,
}

/// Options for a single history query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Max commits (0 = no limit)
    pub limit: usize,
    pub bead_id: Option<String>,
    /// Explicit revision range such as `abc123..def456`
    pub range: Option<String>,
}

impl From<&CorrelatorOptions> for ExtractOptions {
    fn from(opts: &CorrelatorOptions) -> Self {
        Self {
            since: opts.since,
            until: opts.until,
            limit: opts.limit,
            bead_id: opts.bead_id.clone(),
            range: None,
        }
    }
}

/// Dependency relation kinds carried by a full issue record.
///
/// An empty or missing type is a legacy blocking dependency. Kinds this crate
/// does not model deserialize as `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    #[default]
    #[serde(alias = "")]
    Blocks,
    ParentChild,
    Related,
    DiscoveredFrom,
    #[serde(other)]
    Other,
}

impl DependencyType {
    pub fn is_blocking(&self) -> bool {
        matches!(self, DependencyType::Blocks)
    }
}

/// One dependency edge of an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub depends_on_id: String,
    #[serde(rename = "type", default)]
    pub dep_type: DependencyType,
}

/// Full issue record, used for priorities and dependency edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

// =============================================================================
// Serde helpers
// =============================================================================

/// Durations as integer milliseconds
pub(crate) mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::milliseconds(i64::deserialize(d)?))
    }
}

/// Optional durations as integer milliseconds
pub(crate) mod option_duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.num_milliseconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::milliseconds))
    }
}
