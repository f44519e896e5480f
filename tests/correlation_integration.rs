//! End-to-end tests against real git repositories
//!
//! Each test builds a throwaway repository with fixed commit dates, so
//! extracted timestamps and cycle times are exact. Tests skip when `git`
//! is not installed.

use bead_history::{
    BeadInfo, CausalityOptions, Config, CorrelationError, CorrelationMethod, Correlator, CorrelatorOptions, EventType,
    ExtractOptions, Extractor, GitRunner, HistoryReport, IncrementalCorrelator, NetworkBuilder,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
}

/// Throwaway repository; every commit is one hour after the previous one
struct TestRepo {
    dir: TempDir,
    hour: i64,
}

impl TestRepo {
    fn init() -> Option<Self> {
        if !git_available() {
            eprintln!("git not available, skipping");
            return None;
        }
        init_tracing();
        let repo = Self {
            dir: TempDir::new().expect("tempdir"),
            hour: 0,
        };
        repo.run_git(&["init", "-q"], t0());
        Some(repo)
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn run_git(&self, args: &[&str], at: DateTime<Utc>) -> String {
        let date = at.to_rfc3339();
        let output = Command::new("git")
            .arg("-C")
            .arg(self.path())
            .args(["-c", "commit.gpgsign=false", "-c", "core.autocrlf=false"])
            .args(args)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .env("GIT_COMMITTER_NAME", "Test Committer")
            .env("GIT_COMMITTER_EMAIL", "committer@example.com")
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn write_file(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    /// Rewrite the bead file from (id, title, status) rows
    fn write_beads(&self, beads: &[(&str, &str, &str)]) {
        let lines: Vec<String> = beads
            .iter()
            .map(|(id, title, status)| {
                serde_json::json!({ "id": id, "title": title, "status": status }).to_string()
            })
            .collect();
        self.write_file(".beads/beads.jsonl", &(lines.join("\n") + "\n"));
    }

    fn commit_all(&mut self, author: &str, message: &str) -> String {
        let at = self.next_time();
        self.run_git(&["add", "-A"], at);
        let author_arg = format!("{} <{}@example.com>", author, author.to_lowercase());
        self.run_git(&["commit", "-q", "--author", &author_arg, "-m", message], at);
        self.run_git(&["rev-parse", "HEAD"], at)
    }

    fn empty_commits(&mut self, count: usize) {
        for i in 0..count {
            let at = self.next_time();
            let message = format!("chore: tick {}", i);
            self.run_git(
                &["commit", "-q", "--allow-empty", "--author", "Bot <bot@example.com>", "-m", &message],
                at,
            );
        }
    }

    fn next_time(&mut self) -> DateTime<Utc> {
        let at = t0() + Duration::hours(self.hour);
        self.hour += 1;
        at
    }

    fn at(hour: i64) -> DateTime<Utc> {
        t0() + Duration::hours(hour)
    }
}

/// bv-1: created @0h, claimed @1h with code, referenced @2h, closed @3h with code.
/// bv-2: created @0h, untouched.
fn login_history(repo: &mut TestRepo) -> Vec<String> {
    let mut shas = Vec::new();

    repo.write_beads(&[("bv-1", "Add login", "open"), ("bv-2", "Rate limiting", "open")]);
    shas.push(repo.commit_all("Alice", "chore: track work"));

    repo.write_beads(&[("bv-1", "Add login", "in_progress"), ("bv-2", "Rate limiting", "open")]);
    repo.write_file("src/login.rs", "pub fn login() {}\n");
    shas.push(repo.commit_all("Alice", "start login form"));

    repo.write_file("src/login.rs", "pub fn login() {}\npub fn logout() {}\n");
    shas.push(repo.commit_all("Bob", "feat: logout (bv-1)"));

    repo.write_beads(&[("bv-1", "Add login", "closed"), ("bv-2", "Rate limiting", "open")]);
    repo.write_file("src/session.rs", "pub struct Session;\n");
    shas.push(repo.commit_all("Alice", "closes bv-1: session handling"));

    shas
}

fn current_beads() -> Vec<BeadInfo> {
    vec![
        BeadInfo::new("bv-1", "Add login", "closed"),
        BeadInfo::new("bv-2", "Rate limiting", "open"),
    ]
}

fn assert_same_histories(a: &HistoryReport, b: &HistoryReport) {
    assert_eq!(a.histories.keys().collect::<Vec<_>>(), b.histories.keys().collect::<Vec<_>>());
    for (id, left) in &a.histories {
        let right = &b.histories[id];
        assert_eq!(left.events, right.events, "events differ for {}", id);
        assert_eq!(left.commits, right.commits, "commits differ for {}", id);
        assert_eq!(left.milestones, right.milestones, "milestones differ for {}", id);
        assert_eq!(left.cycle_time, right.cycle_time, "cycle time differs for {}", id);
        assert_eq!(left.last_author, right.last_author, "last author differs for {}", id);
    }
    assert_eq!(a.commit_index, b.commit_index);
    assert_eq!(a.stats, b.stats);
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extract_lifecycle_events() {
    let Some(mut repo) = TestRepo::init() else { return };
    let shas = login_history(&mut repo);

    let events = Extractor::new(repo.path())
        .extract(&ExtractOptions::default())
        .unwrap();
    let bv1: Vec<_> = events.iter().filter(|e| e.bead_id == "bv-1").collect();

    assert_eq!(bv1.len(), 3);
    assert_eq!(bv1[0].event_type, EventType::Created);
    assert_eq!(bv1[1].event_type, EventType::Claimed);
    assert_eq!(bv1[1].commit_sha, shas[1]);
    assert_eq!(bv1[1].timestamp, TestRepo::at(1));
    assert_eq!(bv1[2].event_type, EventType::Closed);
    assert_eq!(bv1[2].author, "Alice");

    // chronological across beads
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let only_bv2 = Extractor::new(repo.path())
        .extract_for_bead("bv-2", &ExtractOptions::default())
        .unwrap();
    assert_eq!(only_bv2.len(), 1);
    assert_eq!(only_bv2[0].event_type, EventType::Created);
}

#[test]
fn test_extract_limit_and_since() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let extractor = Extractor::new(repo.path());

    let latest_only = extractor
        .extract(&ExtractOptions {
            limit: 1,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(latest_only.len(), 1);
    assert_eq!(latest_only[0].event_type, EventType::Closed);

    let recent = extractor
        .extract(&ExtractOptions {
            since: Some(TestRepo::at(1)),
            ..Default::default()
        })
        .unwrap();
    assert!(recent.iter().all(|e| e.event_type != EventType::Created));
}

// =============================================================================
// Full reports
// =============================================================================

#[test]
fn test_full_report() {
    let Some(mut repo) = TestRepo::init() else { return };
    let shas = login_history(&mut repo);

    let report = Correlator::new(repo.path())
        .generate_report(&current_beads(), &CorrelatorOptions::default())
        .unwrap();

    assert_eq!(report.git_range, "all history");
    assert_eq!(report.latest_commit_sha, shas[3]);
    assert_eq!(report.stats.total_beads, 2);

    let h = &report.histories["bv-1"];
    assert_eq!(h.status, "closed");
    assert_eq!(h.events.len(), 3);
    let ct = h.cycle_time.as_ref().unwrap();
    assert_eq!(ct.claim_to_close, Some(Duration::hours(2)));
    assert_eq!(ct.create_to_close, Some(Duration::hours(3)));
    assert_eq!(h.last_author, "Alice");

    let commit_shas: Vec<&str> = h.commits.iter().map(|c| c.sha.as_str()).collect();
    assert_eq!(commit_shas, vec![shas[1].as_str(), shas[2].as_str(), shas[3].as_str()]);

    // claim commit: co-committed only
    assert_eq!(h.commits[0].method, CorrelationMethod::CoCommitted);
    assert_eq!(h.commits[0].files.len(), 1);
    assert_eq!(h.commits[0].files[0].path, "src/login.rs");

    // message reference only
    assert_eq!(h.commits[1].method, CorrelationMethod::ExplicitId);
    assert_eq!(h.commits[1].author, "Bob");
    assert!(h.commits[1].confidence >= 0.70);

    // both signals: combined above either alone
    let closing = &h.commits[2];
    assert!(closing.reason.starts_with("Multiple signals"));
    assert!(closing.confidence > 0.95 && closing.confidence <= 0.99);

    let bv2 = &report.histories["bv-2"];
    assert!(bv2.commits.is_empty());
    assert!(bv2.cycle_time.is_none());

    assert_eq!(report.commit_index[&shas[3]], vec!["bv-1"]);
    assert_eq!(report.stats.beads_with_commits, 1);
}

#[test]
fn test_skip_explicit_and_min_confidence() {
    let Some(mut repo) = TestRepo::init() else { return };
    let shas = login_history(&mut repo);
    let correlator = Correlator::new(repo.path());

    let co_only = correlator
        .generate_report(
            &current_beads(),
            &CorrelatorOptions {
                skip_explicit: true,
                ..Default::default()
            },
        )
        .unwrap();
    let h = &co_only.histories["bv-1"];
    assert_eq!(h.commits.len(), 2);
    assert!(h.commits.iter().all(|c| c.method == CorrelationMethod::CoCommitted));
    assert!(!co_only.commit_index.contains_key(&shas[2]));

    let strict = correlator
        .generate_report(
            &current_beads(),
            &CorrelatorOptions {
                min_confidence: 0.99,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(strict.histories["bv-1"]
        .commits
        .iter()
        .all(|c| c.confidence >= 0.99));
}

#[test]
fn test_validate_repository() {
    if !git_available() {
        return;
    }
    let plain = TempDir::new().unwrap();
    let err = Correlator::new(plain.path())
        .generate_report(&current_beads(), &CorrelatorOptions::default())
        .unwrap_err();
    assert!(matches!(err, CorrelationError::NotARepository(_)));

    let Some(repo) = TestRepo::init() else { return };
    let err = bead_history::validate_repository(repo.path()).unwrap_err();
    assert!(matches!(err, CorrelationError::BeadsFileMissing(_)));
}

// =============================================================================
// Incremental updates and caching
// =============================================================================

#[test]
fn test_incremental_matches_full_refresh() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let beads = current_beads();
    let opts = CorrelatorOptions::default();
    let ic = IncrementalCorrelator::new(repo.path());

    let first = ic.generate_report_with_details(&beads, &opts).unwrap();
    assert!(!first.was_incremental);
    assert!(first.refresh_reason.is_some());

    repo.write_beads(&[("bv-1", "Add login", "closed"), ("bv-2", "Rate limiting", "in_progress")]);
    repo.write_file("src/rate.rs", "pub fn limit() {}\n");
    repo.commit_all("Carol", "start bv-2");
    repo.write_beads(&[("bv-1", "Add login", "closed"), ("bv-2", "Rate limiting", "closed")]);
    repo.write_file("src/rate.rs", "pub fn limit() -> bool { true }\n");
    let last = repo.commit_all("Carol", "fixes bv-2");

    let update = ic.generate_report_with_details(&beads, &opts).unwrap();
    assert!(update.was_incremental, "fell back: {:?}", update.refresh_reason);
    assert_eq!(update.new_commit_count, 2);
    assert_eq!(update.merged_event_count, 2);
    assert_eq!(update.report.latest_commit_sha, last);
    assert_eq!(update.report.git_range, "all history (incremental)");

    let full = Correlator::new(repo.path()).generate_report(&beads, &opts).unwrap();
    assert_same_histories(&update.report, &full);

    let bv2 = &update.report.histories["bv-2"];
    assert_eq!(bv2.last_author, "Carol");
    assert_eq!(bv2.cycle_time.as_ref().unwrap().claim_to_close, Some(Duration::hours(1)));

    let stats = ic.cache_stats();
    assert_eq!(stats.incremental_updates, 1);
    assert_eq!(stats.full_refreshes, 1);
    assert_eq!(stats.increment_rate, 0.5);
}

#[test]
fn test_cache_hit() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let ic = IncrementalCorrelator::new(repo.path());
    let beads = current_beads();
    let opts = CorrelatorOptions::default();

    let first = ic.generate_report(&beads, &opts).unwrap();
    let second = ic.generate_report_with_details(&beads, &opts).unwrap();

    assert!(second.was_incremental);
    assert!(second.refresh_reason.is_none());
    assert!(std::sync::Arc::ptr_eq(&first, &second.report));

    let stats = ic.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
    assert_eq!(stats.cache_size, 1);

    ic.invalidate_cache();
    let third = ic.generate_report_with_details(&beads, &opts).unwrap();
    assert!(!third.was_incremental);
    assert_eq!(ic.cache_stats().full_refreshes, 2);
}

#[test]
fn test_changed_bead_set_forces_refresh() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let ic = IncrementalCorrelator::new(repo.path());
    let opts = CorrelatorOptions::default();

    ic.generate_report(&current_beads(), &opts).unwrap();
    let mut renamed = current_beads();
    renamed[1].title = "Rate limiter".to_string();
    let result = ic.generate_report_with_details(&renamed, &opts).unwrap();

    assert!(!result.was_incremental);
    assert_eq!(result.report.histories["bv-2"].title, "Rate limiter");
}

#[test]
fn test_incremental_threshold() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let ic = IncrementalCorrelator::new(repo.path());
    let beads = current_beads();
    let opts = CorrelatorOptions::default();

    ic.generate_report(&beads, &opts).unwrap();

    repo.empty_commits(100);
    let at_limit = ic.generate_report_with_details(&beads, &opts).unwrap();
    assert!(at_limit.was_incremental, "fell back: {:?}", at_limit.refresh_reason);
    assert_eq!(at_limit.new_commit_count, 100);
    assert_eq!(at_limit.merged_event_count, 0);

    repo.empty_commits(101);
    let (possible, count) = ic.can_update_incrementally(&at_limit.report).unwrap();
    assert!(!possible);
    assert_eq!(count, 101);

    let over = ic.generate_report_with_details(&beads, &opts).unwrap();
    assert!(!over.was_incremental);
    assert_eq!(over.refresh_reason.as_deref(), Some("too many new commits (101 > 100)"));
    assert_same_histories(&at_limit.report, &over.report);
}

#[test]
fn test_configured_threshold() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let mut config = Config::default();
    config.correlation.incremental_threshold = 2;
    let ic = IncrementalCorrelator::with_config(repo.path(), config);
    let beads = current_beads();
    let opts = CorrelatorOptions::default();

    ic.generate_report(&beads, &opts).unwrap();
    repo.empty_commits(3);
    let result = ic.generate_report_with_details(&beads, &opts).unwrap();

    assert!(!result.was_incremental);
    assert_eq!(result.refresh_reason.as_deref(), Some("too many new commits (3 > 2)"));
}

// =============================================================================
// Analyses over a real report
// =============================================================================

#[test]
fn test_causality_and_network_from_report() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);
    let report = Correlator::new(repo.path())
        .generate_report(&current_beads(), &CorrelatorOptions::default())
        .unwrap();

    let result = report
        .build_causality_chain("bv-1", &CausalityOptions::default())
        .unwrap();
    assert!(result.chain.is_complete);
    assert_eq!(result.chain.total_time, Duration::hours(3));
    assert_eq!(result.insights.commit_count, 3);
    assert_eq!(result.insights.summary, "Completed in 3h with 3 commits");

    let network = NetworkBuilder::new(&report).build();
    assert_eq!(network.nodes.len(), 2);
    assert!(network.edges.is_empty());
    assert_eq!(network.stats.isolated_nodes, 2);
}

// =============================================================================
// Subprocess timeout
// =============================================================================

#[test]
fn test_git_timeout() {
    let Some(mut repo) = TestRepo::init() else { return };
    login_history(&mut repo);

    let runner = GitRunner::new(repo.path()).with_timeout(Some(std::time::Duration::from_nanos(1)));
    let err = Extractor::with_runner(runner)
        .extract(&ExtractOptions::default())
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Timeout { .. }));
    assert!(err.is_command_error());

    let unbounded = GitRunner::new(repo.path()).with_timeout(None);
    assert!(Extractor::with_runner(unbounded)
        .extract(&ExtractOptions::default())
        .is_ok());
}
