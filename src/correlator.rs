//! Report generation: events + correlated commits -> per-bead histories
//!
//! Flow:
//!   1. Extract lifecycle events from the bead storage file's history
//!   2. Co-commit correlations for claimed/closed events
//!   3. Explicit-ID correlations from commit messages
//!   4. Merge signals, group per bead, derive milestones/cycle time/stats

use crate::cocommit::CoCommitExtractor;
use crate::config::Config;
use crate::error::{CorrelationError, Result};
use crate::explicit::ExplicitMatcher;
use crate::extractor::Extractor;
use crate::git::GitRunner;
use crate::scorer::Scorer;
use crate::types::{
    calculate_cycle_time, get_bead_milestones, BeadEvent, BeadHistory, BeadInfo, CommitIndex, CorrelatedCommit,
    CorrelatorOptions, ExtractOptions, HistoryReport, HistoryStats, BEADS_FILE,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Orchestrates extraction and correlation for one repository
#[derive(Debug)]
pub struct Correlator {
    repo_path: PathBuf,
    git: GitRunner,
    extractor: Extractor,
    co_committer: CoCommitExtractor,
    explicit: ExplicitMatcher,
    scorer: Scorer,
    config: Config,
}

impl Correlator {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_config(repo_path, Config::default())
    }

    pub fn with_config(repo_path: impl Into<PathBuf>, config: Config) -> Self {
        let repo_path = repo_path.into();
        let git = GitRunner::new(repo_path.clone()).with_timeout(config.git_timeout());

        Self {
            extractor: Extractor::with_runner(git.clone()),
            co_committer: CoCommitExtractor::with_runner(git.clone()),
            explicit: ExplicitMatcher::with_runner(git.clone()),
            scorer: Scorer::new(),
            repo_path,
            git,
            config,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn git(&self) -> &GitRunner {
        &self.git
    }

    pub(crate) fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Build a full history report for `beads`
    pub fn generate_report(&self, beads: &[BeadInfo], opts: &CorrelatorOptions) -> Result<HistoryReport> {
        validate_repository(&self.repo_path)?;

        let beads = scoped_beads(beads, opts);
        let extract_opts = ExtractOptions::from(opts);

        let events = self.extractor.extract(&extract_opts)?;
        let events = retain_known_events(events, &beads);
        let commits = self.correlate_commits(&beads, &events, &extract_opts, opts.skip_explicit);

        let histories = build_histories(&beads, &events, &commits);
        let histories = self
            .scorer
            .filter_histories_by_confidence(histories, self.min_confidence(opts));

        let report = HistoryReport {
            generated_at: Utc::now(),
            data_hash: calculate_data_hash(&beads),
            git_range: describe_git_range(opts),
            latest_commit_sha: find_latest_commit_sha(&events, &commits),
            stats: calculate_stats(&histories),
            commit_index: build_commit_index(&histories),
            histories,
        };

        tracing::info!(
            beads = report.stats.total_beads,
            commits = report.stats.total_commits,
            range = %report.git_range,
            "generated history report"
        );
        Ok(report)
    }

    /// Co-commit and explicit-ID correlations for `events`, merged per (SHA, bead)
    pub(crate) fn correlate_commits(
        &self,
        beads: &[BeadInfo],
        events: &[BeadEvent],
        opts: &ExtractOptions,
        skip_explicit: bool,
    ) -> Vec<CorrelatedCommit> {
        let co_commits = self.co_committer.extract_all_co_commits(events);

        let explicit_commits: Vec<CorrelatedCommit> = if skip_explicit {
            Vec::new()
        } else {
            let ids: Vec<String> = beads.iter().map(|b| b.id.clone()).collect();
            self.explicit
                .find_all_explicit_matches(&ids, opts)
                .values()
                .flatten()
                .map(|m| self.explicit.create_correlated_commit(m, Some(&self.co_committer)))
                .collect()
        };

        tracing::debug!(
            co_committed = co_commits.len(),
            explicit = explicit_commits.len(),
            "correlated commits"
        );
        self.scorer.merge_commits(&[&co_commits, &explicit_commits])
    }

    /// Per-call threshold wins over the configured default
    pub(crate) fn min_confidence(&self, opts: &CorrelatorOptions) -> f64 {
        if opts.min_confidence > 0.0 {
            opts.min_confidence
        } else {
            self.config.correlation.min_confidence
        }
    }
}

/// Check that `repo_path` is a git work tree holding the bead storage file
pub fn validate_repository(repo_path: &Path) -> Result<()> {
    if !repo_path.join(".git").exists() {
        return Err(CorrelationError::NotARepository(repo_path.to_path_buf()));
    }

    let beads_file = repo_path.join(BEADS_FILE);
    if !beads_file.exists() {
        return Err(CorrelationError::BeadsFileMissing(beads_file));
    }

    Ok(())
}

/// Restrict the bead set to `opts.bead_id` when one is given
pub(crate) fn scoped_beads(beads: &[BeadInfo], opts: &CorrelatorOptions) -> Vec<BeadInfo> {
    match &opts.bead_id {
        Some(id) => beads.iter().filter(|b| &b.id == id).cloned().collect(),
        None => beads.to_vec(),
    }
}

/// Drop events for beads outside the input set
pub(crate) fn retain_known_events(events: Vec<BeadEvent>, beads: &[BeadInfo]) -> Vec<BeadEvent> {
    let known: HashSet<&str> = beads.iter().map(|b| b.id.as_str()).collect();
    events
        .into_iter()
        .filter(|e| known.contains(e.bead_id.as_str()))
        .collect()
}

/// One history per input bead, with its events and commits
pub(crate) fn build_histories(
    beads: &[BeadInfo],
    events: &[BeadEvent],
    commits: &[CorrelatedCommit],
) -> BTreeMap<String, BeadHistory> {
    let mut histories: BTreeMap<String, BeadHistory> = beads
        .iter()
        .map(|b| (b.id.clone(), BeadHistory::empty(b)))
        .collect();

    for event in events {
        if let Some(h) = histories.get_mut(&event.bead_id) {
            h.events.push(event.clone());
        }
    }
    for commit in commits {
        if let Some(h) = histories.get_mut(&commit.bead_id) {
            h.commits.push(commit.clone());
        }
    }

    for h in histories.values_mut() {
        finalize_history(h);
    }
    histories
}

/// Re-derive ordering, milestones, cycle time and last author from events/commits
pub(crate) fn finalize_history(h: &mut BeadHistory) {
    h.events.sort_by_key(|e| e.timestamp);
    h.commits = dedup_commits(std::mem::take(&mut h.commits));
    h.commits
        .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));

    h.milestones = get_bead_milestones(&h.events);
    h.cycle_time = calculate_cycle_time(&h.milestones);

    h.last_author = match (h.commits.last(), h.events.last()) {
        (Some(c), _) => c.author.clone(),
        (None, Some(e)) => e.author.clone(),
        (None, None) => String::new(),
    };
}

/// Remove duplicate SHAs, keeping the first occurrence
pub fn dedup_commits(commits: Vec<CorrelatedCommit>) -> Vec<CorrelatedCommit> {
    let mut seen = HashSet::new();
    commits
        .into_iter()
        .filter(|c| seen.insert(c.sha.clone()))
        .collect()
}

/// SHA -> bead IDs, from every history's commits
pub fn build_commit_index(histories: &BTreeMap<String, BeadHistory>) -> CommitIndex {
    let mut index = CommitIndex::new();
    for (bead_id, h) in histories {
        for commit in &h.commits {
            index.entry(commit.sha.clone()).or_default().push(bead_id.clone());
        }
    }
    index
}

/// Aggregate statistics over histories
pub fn calculate_stats(histories: &BTreeMap<String, BeadHistory>) -> HistoryStats {
    let mut stats = HistoryStats {
        total_beads: histories.len(),
        ..Default::default()
    };

    let mut authors = BTreeSet::new();
    let mut unique_commits = HashSet::new();
    let mut cycle_days = Vec::new();

    for h in histories.values() {
        if !h.commits.is_empty() {
            stats.beads_with_commits += 1;
        }

        for commit in &h.commits {
            unique_commits.insert(commit.sha.as_str());
            if !commit.author.is_empty() {
                authors.insert(commit.author.as_str());
            }
            *stats
                .method_distribution
                .entry(commit.method.to_string())
                .or_default() += 1;
        }

        for event in &h.events {
            if !event.author.is_empty() {
                authors.insert(event.author.as_str());
            }
        }

        if let Some(claim_to_close) = h.cycle_time.as_ref().and_then(|ct| ct.claim_to_close) {
            cycle_days.push(claim_to_close.num_milliseconds() as f64 / 86_400_000.0);
        }
    }

    stats.total_commits = unique_commits.len();
    stats.unique_authors = authors.len();

    if stats.beads_with_commits > 0 {
        stats.avg_commits_per_bead = stats.total_commits as f64 / stats.beads_with_commits as f64;
    }
    if !cycle_days.is_empty() {
        stats.avg_cycle_time_days = Some(cycle_days.iter().sum::<f64>() / cycle_days.len() as f64);
    }

    stats
}

/// SHA-256 over (ID, Status) pairs, order-insensitive. Titles don't count.
pub fn calculate_data_hash(beads: &[BeadInfo]) -> String {
    let mut pairs: Vec<(&str, &str)> = beads
        .iter()
        .map(|b| (b.id.as_str(), b.status.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, status) in pairs {
        hasher.update(id.as_bytes());
        hasher.update(b":");
        hasher.update(status.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// "all history", or the active filters, e.g. "since 2024-01-01, limit 100 commits"
pub fn describe_git_range(opts: &CorrelatorOptions) -> String {
    let mut parts = Vec::new();
    if let Some(since) = opts.since {
        parts.push(format!("since {}", since.format("%Y-%m-%d")));
    }
    if let Some(until) = opts.until {
        parts.push(format!("until {}", until.format("%Y-%m-%d")));
    }
    if opts.limit > 0 {
        parts.push(format!("limit {} commits", opts.limit));
    }

    if parts.is_empty() {
        "all history".to_string()
    } else {
        parts.join(", ")
    }
}

/// SHA of the newest event or commit by timestamp; empty if there are none
pub fn find_latest_commit_sha(events: &[BeadEvent], commits: &[CorrelatedCommit]) -> String {
    let candidates = events
        .iter()
        .map(|e| (e.timestamp, e.commit_sha.as_str()))
        .chain(commits.iter().map(|c| (c.timestamp, c.sha.as_str())));

    let mut latest: Option<(chrono::DateTime<Utc>, &str)> = None;
    for (ts, sha) in candidates {
        match latest {
            Some((best, _)) if ts <= best => {}
            _ => latest = Some((ts, sha)),
        }
    }
    latest.map(|(_, sha)| sha.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelationMethod, CycleTime, EventType};
    use chrono::{Duration, TimeZone};

    fn ts(hours: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn event(bead: &str, event_type: EventType, hours: i64, author: &str) -> BeadEvent {
        BeadEvent {
            bead_id: bead.to_string(),
            event_type,
            timestamp: ts(hours),
            commit_sha: format!("sha-{bead}-{hours}"),
            commit_msg: String::new(),
            author: author.to_string(),
            author_email: String::new(),
        }
    }

    fn commit(bead: &str, sha: &str, hours: i64, author: &str, method: CorrelationMethod) -> CorrelatedCommit {
        CorrelatedCommit {
            bead_id: bead.to_string(),
            sha: sha.to_string(),
            short_sha: sha.chars().take(7).collect(),
            message: String::new(),
            author: author.to_string(),
            author_email: String::new(),
            timestamp: ts(hours),
            files: vec![],
            method,
            confidence: 0.95,
            reason: String::new(),
        }
    }

    #[test]
    fn test_build_histories_empty() {
        assert!(build_histories(&[], &[], &[]).is_empty());
    }

    #[test]
    fn test_build_histories_basic() {
        let beads = vec![BeadInfo::new("bv-1", "Task 1", "open"), BeadInfo::new("bv-2", "Task 2", "closed")];
        let events = vec![
            event("bv-2", EventType::Created, -48, "Bob"),
            event("bv-1", EventType::Created, -24, "Alice"),
            event("bv-1", EventType::Claimed, -12, "Alice"),
            event("bv-2", EventType::Closed, -1, "Bob"),
            event("bv-9", EventType::Created, 0, "Eve"),
        ];

        let histories = build_histories(&beads, &events, &[]);
        assert_eq!(histories.len(), 2);

        let h1 = &histories["bv-1"];
        assert_eq!(h1.events.len(), 2);
        assert!(h1.milestones.created.is_some());
        assert!(h1.milestones.claimed.is_some());
        assert!(h1.cycle_time.is_none());
        assert_eq!(h1.last_author, "Alice");

        let h2 = &histories["bv-2"];
        assert_eq!(h2.title, "Task 2");
        assert!(h2.cycle_time.is_some());
    }

    #[test]
    fn test_build_histories_commits_ordered_and_last_author() {
        let beads = vec![BeadInfo::new("bv-1", "Task 1", "in_progress")];
        let commits = vec![
            commit("bv-1", "bbb", 5, "Newer", CorrelationMethod::ExplicitId),
            commit("bv-1", "aaa", 1, "Older", CorrelationMethod::CoCommitted),
        ];
        let h = &build_histories(&beads, &[], &commits)["bv-1"];
        assert_eq!(h.commits[0].sha, "aaa");
        assert_eq!(h.last_author, "Newer");
    }

    #[test]
    fn test_build_commit_index() {
        let mut histories = BTreeMap::new();
        histories.insert(
            "bv-1".to_string(),
            BeadHistory {
                bead_id: "bv-1".to_string(),
                commits: vec![
                    commit("bv-1", "abc123", 0, "A", CorrelationMethod::CoCommitted),
                    commit("bv-1", "def456", 1, "A", CorrelationMethod::CoCommitted),
                ],
                ..Default::default()
            },
        );
        histories.insert(
            "bv-2".to_string(),
            BeadHistory {
                bead_id: "bv-2".to_string(),
                commits: vec![
                    commit("bv-2", "abc123", 0, "A", CorrelationMethod::CoCommitted),
                    commit("bv-2", "ghi789", 2, "A", CorrelationMethod::CoCommitted),
                ],
                ..Default::default()
            },
        );

        let index = build_commit_index(&histories);
        assert_eq!(index.len(), 3);
        assert_eq!(index["abc123"], vec!["bv-1", "bv-2"]);
    }

    #[test]
    fn test_calculate_stats() {
        assert_eq!(calculate_stats(&BTreeMap::new()).total_beads, 0);

        let mut histories = BTreeMap::new();
        histories.insert(
            "bv-1".to_string(),
            BeadHistory {
                events: vec![event("bv-1", EventType::Created, 0, "Alice")],
                commits: vec![
                    commit("bv-1", "a1", 0, "Alice", CorrelationMethod::CoCommitted),
                    commit("bv-1", "a2", 1, "Alice", CorrelationMethod::CoCommitted),
                ],
                cycle_time: Some(CycleTime {
                    claim_to_close: Some(Duration::hours(24)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        histories.insert(
            "bv-2".to_string(),
            BeadHistory {
                events: vec![event("bv-2", EventType::Created, 0, "Bob")],
                commits: vec![commit("bv-2", "b1", 0, "Bob", CorrelationMethod::ExplicitId)],
                ..Default::default()
            },
        );
        histories.insert("bv-3".to_string(), BeadHistory::default());

        let stats = calculate_stats(&histories);
        assert_eq!(stats.total_beads, 3);
        assert_eq!(stats.beads_with_commits, 2);
        assert_eq!(stats.total_commits, 3);
        assert_eq!(stats.unique_authors, 2);
        assert_eq!(stats.avg_commits_per_bead, 1.5);
        assert_eq!(stats.method_distribution["co_committed"], 2);
        assert_eq!(stats.method_distribution["explicit_id"], 1);
        assert_eq!(stats.avg_cycle_time_days, Some(1.0));
    }

    #[test]
    fn test_describe_git_range() {
        assert_eq!(describe_git_range(&CorrelatorOptions::default()), "all history");
        assert_eq!(
            describe_git_range(&CorrelatorOptions {
                limit: 100,
                ..Default::default()
            }),
            "limit 100 commits"
        );
        assert_eq!(
            describe_git_range(&CorrelatorOptions {
                since: Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()),
                ..Default::default()
            }),
            "since 2024-01-15"
        );
        assert_eq!(
            describe_git_range(&CorrelatorOptions {
                since: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                until: Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()),
                limit: 100,
                ..Default::default()
            }),
            "since 2024-01-01, until 2024-12-31, limit 100 commits"
        );
    }

    #[test]
    fn test_data_hash_ignores_titles_and_order() {
        let a = vec![BeadInfo::new("bv-1", "One", "open"), BeadInfo::new("bv-2", "Two", "closed")];
        let b = vec![BeadInfo::new("bv-2", "Renamed", "closed"), BeadInfo::new("bv-1", "One", "open")];
        let c = vec![BeadInfo::new("bv-1", "One", "open"), BeadInfo::new("bv-2", "Two", "open")];

        assert_eq!(calculate_data_hash(&a), calculate_data_hash(&b));
        assert_ne!(calculate_data_hash(&a), calculate_data_hash(&c));
    }

    #[test]
    fn test_dedup_commits_keeps_first() {
        let mut first = commit("bv-1", "abc", 0, "A", CorrelationMethod::CoCommitted);
        first.message = "First".to_string();
        let mut dup = first.clone();
        dup.message = "Duplicate".to_string();
        let other = commit("bv-1", "def", 1, "A", CorrelationMethod::CoCommitted);

        let result = dedup_commits(vec![first, other, dup]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].message, "First");
    }

    #[test]
    fn test_find_latest_commit_sha() {
        assert_eq!(find_latest_commit_sha(&[], &[]), "");

        let events = vec![
            event("bv-1", EventType::Created, -1, "A"),
            event("bv-1", EventType::Claimed, 3, "A"),
        ];
        assert_eq!(find_latest_commit_sha(&events, &[]), "sha-bv-1-3");

        let commits = vec![commit("bv-1", "newest", 5, "A", CorrelationMethod::CoCommitted)];
        assert_eq!(find_latest_commit_sha(&events, &commits), "newest");
    }

    #[test]
    fn test_validate_repository() {
        assert!(matches!(
            validate_repository(Path::new("/nonexistent/path")),
            Err(CorrelationError::NotARepository(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(matches!(
            validate_repository(dir.path()),
            Err(CorrelationError::BeadsFileMissing(_))
        ));

        std::fs::create_dir(dir.path().join(".beads")).unwrap();
        std::fs::write(dir.path().join(BEADS_FILE), "").unwrap();
        assert!(validate_repository(dir.path()).is_ok());
    }

    #[test]
    fn test_min_confidence_default_from_config() {
        let mut config = Config::default();
        config.correlation.min_confidence = 0.8;
        let correlator = Correlator::with_config("/tmp/test", config);

        assert_eq!(correlator.min_confidence(&CorrelatorOptions::default()), 0.8);
        let opts = CorrelatorOptions {
            min_confidence: 0.9,
            ..Default::default()
        };
        assert_eq!(correlator.min_confidence(&opts), 0.9);
        assert_eq!(correlator.repo_path(), Path::new("/tmp/test"));
    }

    #[test]
    fn test_scoped_beads() {
        let beads = vec![BeadInfo::new("bv-1", "", "open"), BeadInfo::new("bv-2", "", "open")];
        let opts = CorrelatorOptions {
            bead_id: Some("bv-2".to_string()),
            ..Default::default()
        };
        let scoped = scoped_beads(&beads, &opts);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "bv-2");
    }
}
