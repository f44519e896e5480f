//! Incremental report updates
//!
//! A cached report for the same bead set and options can be brought up to
//! date by extracting only the commits made after its latest commit and
//! merging them in. Merges are append-only: existing events and commits are
//! copied, never dropped, and only touched beads get re-derived.
//!
//! Whenever that isn't possible (no prior report, too many new commits,
//! listing or extraction failure) a full refresh runs instead. The fallback
//! is never surfaced as an error.

use crate::cache::{build_cache_key, CacheKey, HistoryCache};
use crate::config::Config;
use crate::correlator::{
    build_commit_index, calculate_stats, finalize_history, find_latest_commit_sha, retain_known_events,
    scoped_beads, Correlator,
};
use crate::error::{CorrelationError, Result};
use crate::git::GitRunner;
use crate::types::{BeadEvent, BeadHistory, BeadInfo, CorrelatedCommit, CorrelatorOptions, ExtractOptions, HistoryReport};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// More new commits than this and a full rebuild is cheaper
pub const INCREMENTAL_THRESHOLD: usize = 100;

const INCREMENTAL_SUFFIX: &str = " (incremental)";

/// Outcome of one report request
#[derive(Debug, Clone)]
pub struct IncrementalUpdateResult {
    pub report: Arc<HistoryReport>,
    /// True for cache hits and incremental merges
    pub was_incremental: bool,
    pub new_commit_count: usize,
    pub merged_event_count: usize,
    pub merged_commit_count: usize,
    /// Why a full refresh ran, if one did
    pub refresh_reason: Option<String>,
}

impl IncrementalUpdateResult {
    fn full_refresh(report: Arc<HistoryReport>, reason: &RefreshReason) -> Self {
        Self {
            report,
            was_incremental: false,
            new_commit_count: 0,
            merged_event_count: 0,
            merged_commit_count: 0,
            refresh_reason: Some(reason.to_string()),
        }
    }

    fn reused(report: Arc<HistoryReport>) -> Self {
        Self {
            report,
            was_incremental: true,
            new_commit_count: 0,
            merged_event_count: 0,
            merged_commit_count: 0,
            refresh_reason: None,
        }
    }
}

/// Why an incremental update fell back to a full refresh
#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshReason {
    CacheKeyUnavailable,
    NoCachedReport,
    NoAnchorCommit,
    TooManyCommits { count: usize, threshold: usize },
    ListingFailed(String),
    ExtractionFailed(String),
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::CacheKeyUnavailable => write!(f, "failed to build cache key"),
            RefreshReason::NoCachedReport => write!(f, "no suitable cached report for incremental update"),
            RefreshReason::NoAnchorCommit => write!(f, "cached report has no latest commit"),
            RefreshReason::TooManyCommits { count, threshold } => {
                write!(f, "too many new commits ({} > {})", count, threshold)
            }
            RefreshReason::ListingFailed(e) => write!(f, "finding new commits: {}", e),
            RefreshReason::ExtractionFailed(e) => write!(f, "extracting new events: {}", e),
        }
    }
}

/// Cache and update counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IncrementalCorrelatorStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub incremental_updates: u64,
    pub full_refreshes: u64,
    /// Incremental updates over all non-cached updates
    pub increment_rate: f64,
    pub cache_size: usize,
    pub max_size: usize,
    pub max_age: Duration,
}

/// Correlator with a report cache and incremental updates
#[derive(Debug)]
pub struct IncrementalCorrelator {
    correlator: Correlator,
    cache: HistoryCache,
    threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    increments: AtomicU64,
    refreshes: AtomicU64,
}

impl IncrementalCorrelator {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_config(repo_path, Config::default())
    }

    /// Custom cache TTL and capacity, other settings default
    pub fn with_options(repo_path: impl Into<PathBuf>, max_age: Duration, max_size: usize) -> Self {
        let mut config = Config::default();
        config.cache.max_age_secs = max_age.as_secs();
        config.cache.max_size = max_size;
        let mut ic = Self::with_config(repo_path, config);
        ic.cache = HistoryCache::new(max_age, max_size);
        ic
    }

    pub fn with_config(repo_path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            cache: HistoryCache::new(config.cache_max_age(), config.cache.max_size),
            threshold: config.correlation.incremental_threshold,
            correlator: Correlator::with_config(repo_path, config),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            increments: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Report for `beads`, reusing or extending cached work when possible
    pub fn generate_report(&self, beads: &[BeadInfo], opts: &CorrelatorOptions) -> Result<Arc<HistoryReport>> {
        Ok(self.generate_report_with_details(beads, opts)?.report)
    }

    /// Like `generate_report`, with details on how the report was produced
    pub fn generate_report_with_details(
        &self,
        beads: &[BeadInfo],
        opts: &CorrelatorOptions,
    ) -> Result<IncrementalUpdateResult> {
        let key = match build_cache_key(self.correlator.git(), beads, opts) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(error = %e, "cache key unavailable, generating uncached report");
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                let report = Arc::new(self.correlator.generate_report(beads, opts)?);
                return Ok(IncrementalUpdateResult::full_refresh(
                    report,
                    &RefreshReason::CacheKeyUnavailable,
                ));
            }
        };

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(head = %key.head_sha, "history cache hit");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(IncrementalUpdateResult::reused(cached));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let reason = match self.cache.find_same_inputs(&key) {
            None => RefreshReason::NoCachedReport,
            Some(existing) if existing.latest_commit_sha.is_empty() => RefreshReason::NoAnchorCommit,
            Some(existing) => match self.try_incremental_update(&existing, beads, opts) {
                Ok(result) => {
                    self.increments.fetch_add(1, Ordering::Relaxed);
                    self.cache.put(key, Arc::clone(&result.report));
                    return Ok(result);
                }
                Err(reason) => reason,
            },
        };

        tracing::info!(%reason, "running full history refresh");
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let report = Arc::new(self.correlator.generate_report(beads, opts)?);
        self.cache.put(key, Arc::clone(&report));

        Ok(IncrementalUpdateResult::full_refresh(report, &reason))
    }

    fn try_incremental_update(
        &self,
        existing: &Arc<HistoryReport>,
        beads: &[BeadInfo],
        opts: &CorrelatorOptions,
    ) -> std::result::Result<IncrementalUpdateResult, RefreshReason> {
        let git = self.correlator.git();
        let new_commits = list_commits_since(git, &existing.latest_commit_sha)
            .map_err(|e| RefreshReason::ListingFailed(e.to_string()))?;

        if new_commits.len() > self.threshold {
            return Err(RefreshReason::TooManyCommits {
                count: new_commits.len(),
                threshold: self.threshold,
            });
        }

        let (Some(first), Some(last)) = (new_commits.first(), new_commits.last()) else {
            tracing::debug!("no new commits, cached report still current");
            return Ok(IncrementalUpdateResult::reused(Arc::clone(existing)));
        };

        let scoped = scoped_beads(beads, opts);
        let (range_opts, events) = self
            .extract_range(first, last, opts)
            .map_err(|e| RefreshReason::ExtractionFailed(e.to_string()))?;
        let events = retain_known_events(events, &scoped);

        let commits = self
            .correlator
            .correlate_commits(&scoped, &events, &range_opts, opts.skip_explicit);
        let commits = self
            .correlator
            .scorer()
            .filter_by_confidence(commits, self.correlator.min_confidence(opts));

        let mut merged = merge_reports(existing, &scoped, &events, &commits);
        merged.latest_commit_sha = last.clone();

        tracing::info!(
            new_commits = new_commits.len(),
            events = events.len(),
            commits = commits.len(),
            "merged incremental history update"
        );

        Ok(IncrementalUpdateResult {
            report: Arc::new(merged),
            was_incremental: true,
            new_commit_count: new_commits.len(),
            merged_event_count: events.len(),
            merged_commit_count: commits.len(),
            refresh_reason: None,
        })
    }

    /// Events for `first..=last`, trying parent notations a root commit can't satisfy
    fn extract_range(
        &self,
        first: &str,
        last: &str,
        opts: &CorrelatorOptions,
    ) -> Result<(ExtractOptions, Vec<BeadEvent>)> {
        let candidates = [
            format!("{}^..{}", first, last),
            format!("{}~1..{}", first, last),
            format!("{}..{}", first, last),
        ];

        let mut last_err = None;
        for range in candidates {
            let range_opts = ExtractOptions {
                range: Some(range),
                ..ExtractOptions::from(opts)
            };
            match self.correlator.extractor().extract(&range_opts) {
                Ok(events) => return Ok((range_opts, events)),
                Err(e) if e.is_command_error() => {
                    tracing::debug!(range = ?range_opts.range, error = %e, "range notation rejected");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| CorrelationError::Parse("no usable commit range".to_string())))
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Put a report in the cache under `key`
    pub fn prime_cache(&self, key: CacheKey, report: Arc<HistoryReport>) {
        self.cache.put(key, report);
    }

    pub fn cache_stats(&self) -> IncrementalCorrelatorStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let increments = self.increments.load(Ordering::Relaxed);
        let refreshes = self.refreshes.load(Ordering::Relaxed);
        let cache = self.cache.stats();

        IncrementalCorrelatorStats {
            hits,
            misses,
            hit_rate: ratio(hits, hits + misses),
            incremental_updates: increments,
            full_refreshes: refreshes,
            increment_rate: ratio(increments, increments + refreshes),
            cache_size: cache.size,
            max_size: cache.max_size,
            max_age: cache.max_age,
        }
    }

    /// Cheap precheck: (update possible, new commit count). Runs no extraction.
    pub fn can_update_incrementally(&self, report: &HistoryReport) -> Result<(bool, usize)> {
        if report.latest_commit_sha.is_empty() {
            return Ok((false, 0));
        }
        let count = count_commits_since(self.correlator.git(), &report.latest_commit_sha)?;
        Ok((count <= self.threshold, count))
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Commits after `since_sha` up to HEAD, oldest first
pub fn list_commits_since(git: &GitRunner, since_sha: &str) -> Result<Vec<String>> {
    let out = git.run(&["rev-list", "--reverse", &format!("{}..HEAD", since_sha)])?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Number of commits after `since_sha` up to HEAD
pub fn count_commits_since(git: &GitRunner, since_sha: &str) -> Result<usize> {
    let out = git.run(&["rev-list", "--count", &format!("{}..HEAD", since_sha)])?;
    out.trim()
        .parse()
        .map_err(|e| CorrelationError::Parse(format!("commit count {:?}: {}", out.trim(), e)))
}

/// New report = copy of `existing` + new events/commits.
///
/// Titles and statuses come from `beads`; beads missing from `existing` get an
/// empty history. Events already present (same commit, bead and type) are not
/// added twice, and commits keep their first occurrence per SHA.
pub(crate) fn merge_reports(
    existing: &HistoryReport,
    beads: &[BeadInfo],
    new_events: &[BeadEvent],
    new_commits: &[CorrelatedCommit],
) -> HistoryReport {
    let mut histories = existing.histories.clone();

    for bead in beads {
        let h = histories
            .entry(bead.id.clone())
            .or_insert_with(|| BeadHistory::empty(bead));
        h.title = bead.title.clone();
        h.status = bead.status.clone();
    }

    let mut touched = BTreeSet::new();
    for event in new_events {
        let Some(h) = histories.get_mut(&event.bead_id) else {
            continue;
        };
        let duplicate = h
            .events
            .iter()
            .any(|e| e.commit_sha == event.commit_sha && e.event_type == event.event_type);
        if !duplicate {
            h.events.push(event.clone());
            touched.insert(event.bead_id.clone());
        }
    }
    for commit in new_commits {
        if let Some(h) = histories.get_mut(&commit.bead_id) {
            h.commits.push(commit.clone());
            touched.insert(commit.bead_id.clone());
        }
    }

    for id in &touched {
        if let Some(h) = histories.get_mut(id) {
            finalize_history(h);
        }
    }

    let git_range = if existing.git_range.ends_with(INCREMENTAL_SUFFIX) {
        existing.git_range.clone()
    } else {
        format!("{}{}", existing.git_range, INCREMENTAL_SUFFIX)
    };

    let latest = find_latest_commit_sha(new_events, new_commits);
    let latest_commit_sha = if latest.is_empty() {
        existing.latest_commit_sha.clone()
    } else {
        latest
    };

    HistoryReport {
        generated_at: Utc::now(),
        data_hash: existing.data_hash.clone(),
        git_range,
        latest_commit_sha,
        stats: calculate_stats(&histories),
        commit_index: build_commit_index(&histories),
        histories,
    }
}
