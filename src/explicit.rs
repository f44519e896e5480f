//! Explicit bead ID matching in commit messages
//!
//! Patterns are tried most-specific first; an ID is reported once, under the
//! first pattern that found it.

use crate::cocommit::CoCommitExtractor;
use crate::error::Result;
use crate::extractor::{filter_args, parse_commit_info, LOG_FORMAT};
use crate::git::GitRunner;
use crate::types::{short_sha, BeadEvent, CorrelatedCommit, CorrelationMethod, EventType, ExtractOptions};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

lazy_static! {
    static ref DEFAULT_PATTERNS: Vec<Regex> = vec![
        // [PROJ-123]
        Regex::new(r"\[([A-Za-z]+-\d+)\]").unwrap(),
        // Action keywords, optional colon and '#'
        Regex::new(r"(?i)closes?:?\s*#?([A-Za-z]+-\d+)").unwrap(),
        Regex::new(r"(?i)fix(?:es|ed)?:?\s*#?([A-Za-z]+-\d+)").unwrap(),
        Regex::new(r"(?i)refs?:?\s*#?([A-Za-z]+-\d+)").unwrap(),
        Regex::new(r"(?i)resolves?:?\s*#?([A-Za-z]+-\d+)").unwrap(),
        // beads-123 / bv-123 shorthand
        Regex::new(r"(?i)beads?[-_](\d+)").unwrap(),
        Regex::new(r"(?i)bv[-_](\d+)").unwrap(),
        // PROJECT-123 at a word boundary
        Regex::new(r"\b([A-Z]{2,10}-\d+)\b").unwrap(),
    ];
}

/// Default bead ID patterns, most specific first
pub fn default_patterns() -> Vec<Regex> {
    DEFAULT_PATTERNS.clone()
}

/// How an ID appeared in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Closes,
    Fixes,
    Refs,
    Resolves,
    Bracket,
    Bead,
    Generic,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Closes => "closes",
            MatchType::Fixes => "fixes",
            MatchType::Refs => "refs",
            MatchType::Resolves => "resolves",
            MatchType::Bracket => "bracket",
            MatchType::Bead => "bead",
            MatchType::Generic => "generic",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ID found in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMatch {
    /// Normalized ID
    pub id: String,
    pub match_type: MatchType,
    pub raw_match: String,
}

/// A commit whose message references a bead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitMatch {
    pub bead_id: String,
    pub commit_sha: String,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub match_type: MatchType,
    pub confidence: f64,
}

/// Finds commits that explicitly reference bead IDs in their messages
#[derive(Debug, Clone)]
pub struct ExplicitMatcher {
    git: GitRunner,
    patterns: Vec<Regex>,
}

impl ExplicitMatcher {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_runner(GitRunner::new(repo_path))
    }

    pub fn with_runner(git: GitRunner) -> Self {
        Self {
            git,
            patterns: default_patterns(),
        }
    }

    /// Matcher using a custom pattern list. Capture group 1 must be the ID.
    pub fn with_patterns(git: GitRunner, patterns: Vec<Regex>) -> Self {
        Self { git, patterns }
    }

    pub fn add_pattern(&mut self, pattern: Regex) {
        self.patterns.push(pattern);
    }

    /// Distinct IDs in first-seen order, patterns evaluated in priority order
    pub fn extract_ids_from_message(&self, message: &str) -> Vec<IdMatch> {
        let mut matches = Vec::new();
        let mut seen = HashSet::new();

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(message) {
                let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let id = normalize_bead_id(id.as_str());
                if seen.insert(id.clone()) {
                    matches.push(IdMatch {
                        id,
                        match_type: classify_match(whole.as_str()),
                        raw_match: whole.as_str().to_string(),
                    });
                }
            }
        }

        matches
    }

    /// Commits referencing `bead_id`, deduped by SHA in search order.
    ///
    /// Runs one case-insensitive literal `git log --grep` per needle; any
    /// subprocess failure aborts the call.
    pub fn find_commits_for_bead(&self, bead_id: &str, opts: &ExtractOptions) -> Result<Vec<ExplicitMatch>> {
        let needles = build_search_needles(bead_id);
        let mut all = Vec::new();
        let mut seen = HashSet::new();

        for needle in &needles {
            for m in self.search_with_grep(bead_id, needle, &needles, opts)? {
                if seen.insert(m.commit_sha.clone()) {
                    all.push(m);
                }
            }
        }

        Ok(all)
    }

    /// Explicit references for every bead. Beads whose search fails are skipped.
    pub fn find_all_explicit_matches(
        &self,
        bead_ids: &[String],
        opts: &ExtractOptions,
    ) -> BTreeMap<String, Vec<ExplicitMatch>> {
        let mut results = BTreeMap::new();

        for bead_id in bead_ids {
            match self.find_commits_for_bead(bead_id, opts) {
                Ok(matches) if !matches.is_empty() => {
                    results.insert(bead_id.clone(), matches);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(bead_id = %bead_id, error = %e, "explicit search failed, skipping"),
            }
        }

        results
    }

    /// Convert a match into a correlated commit, attaching the commit's files when available
    pub fn create_correlated_commit(
        &self,
        m: &ExplicitMatch,
        co_committer: Option<&CoCommitExtractor>,
    ) -> CorrelatedCommit {
        let files = co_committer
            .and_then(|cc| {
                let event = BeadEvent {
                    bead_id: m.bead_id.clone(),
                    event_type: EventType::Modified,
                    timestamp: m.timestamp,
                    commit_sha: m.commit_sha.clone(),
                    commit_msg: m.message.clone(),
                    author: m.author.clone(),
                    author_email: m.author_email.clone(),
                };
                cc.extract_co_committed_files(&event).ok()
            })
            .unwrap_or_default();

        CorrelatedCommit {
            bead_id: m.bead_id.clone(),
            sha: m.commit_sha.clone(),
            short_sha: short_sha(&m.commit_sha),
            message: m.message.clone(),
            author: m.author.clone(),
            author_email: m.author_email.clone(),
            timestamp: m.timestamp,
            files,
            method: CorrelationMethod::ExplicitId,
            confidence: m.confidence,
            reason: format!(
                "Commit message explicitly references {} ({})",
                m.bead_id, m.match_type
            ),
        }
    }

    fn search_with_grep(
        &self,
        bead_id: &str,
        needle: &str,
        needles: &[String],
        opts: &ExtractOptions,
    ) -> Result<Vec<ExplicitMatch>> {
        let mut args = vec![
            "log".to_string(),
            format!("--grep={}", needle),
            "-i".to_string(),
            "--fixed-strings".to_string(),
            LOG_FORMAT.to_string(),
        ];
        args.extend(filter_args(opts));
        if let Some(range) = &opts.range {
            args.push(range.clone());
        }

        let output = self.git.run(&args)?;
        Ok(self.parse_grep_output(&output, bead_id, needles))
    }

    fn parse_grep_output(&self, output: &str, bead_id: &str, needles: &[String]) -> Vec<ExplicitMatch> {
        let mut matches = Vec::new();

        for line in output.lines().filter(|l| !l.is_empty()) {
            let Some(info) = parse_commit_info(line) else {
                continue;
            };
            // --grep matches substrings, so bv-1 also finds bv-12
            if !needles.iter().any(|n| contains_id_token(&info.message, n)) {
                continue;
            }

            let id_matches = self.extract_ids_from_message(&info.message);
            let wanted = bead_id.to_lowercase();
            let (match_type, confidence) = id_matches
                .iter()
                .find(|m| m.id == wanted)
                .map(|m| (m.match_type, calculate_confidence(m.match_type, id_matches.len())))
                .unwrap_or((MatchType::Generic, calculate_confidence(MatchType::Generic, id_matches.len())));

            matches.push(ExplicitMatch {
                bead_id: bead_id.to_string(),
                commit_sha: info.sha,
                message: info.message,
                author: info.author,
                author_email: info.author_email,
                timestamp: info.timestamp,
                match_type,
                confidence,
            });
        }

        matches
    }
}

/// Numeric-only IDs (from the shorthand patterns) become `bv-N`; others are lowercased
pub fn normalize_bead_id(id: &str) -> String {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        format!("bv-{}", id)
    } else {
        id.to_lowercase()
    }
}

/// Classify a raw match by its keyword, bracket, or prefix
pub fn classify_match(raw: &str) -> MatchType {
    let lower = raw.to_lowercase();
    if lower.contains("close") {
        MatchType::Closes
    } else if lower.contains("fix") {
        MatchType::Fixes
    } else if lower.contains("ref") {
        MatchType::Refs
    } else if lower.contains("resolve") {
        MatchType::Resolves
    } else if raw.starts_with('[') && raw.ends_with(']') {
        MatchType::Bracket
    } else if lower.starts_with("bead") || lower.starts_with("bv") {
        MatchType::Bead
    } else {
        MatchType::Generic
    }
}

/// Confidence for an explicit reference, given how many IDs the message names
pub fn calculate_confidence(match_type: MatchType, total_matches: usize) -> f64 {
    let mut confidence = 0.90;

    confidence += match match_type {
        MatchType::Closes | MatchType::Fixes | MatchType::Resolves => 0.05,
        MatchType::Bead => 0.03,
        MatchType::Bracket => 0.02,
        MatchType::Refs => 0.01,
        MatchType::Generic => 0.0,
    };

    if total_matches > 1 {
        confidence -= 0.02 * (total_matches - 1) as f64;
    }

    confidence.clamp(0.70, 0.99)
}

/// Literal search strings for a bead ID: exact, upper-cased, and shorthand forms of `bv-N`
pub fn build_search_needles(bead_id: &str) -> Vec<String> {
    let mut needles = vec![bead_id.to_string()];
    let upper = bead_id.to_uppercase();
    if upper != bead_id {
        needles.push(upper);
    }

    let lower = bead_id.to_lowercase();
    if let Some(num) = lower.strip_prefix("bv-") {
        if !num.is_empty() {
            for prefix in ["beads-", "bead-", "BEADS-", "BEAD-"] {
                needles.push(format!("{}{}", prefix, num));
            }
        }
    }

    needles
}

/// Case-insensitive containment of `id` not glued to surrounding alphanumerics
fn contains_id_token(message: &str, id: &str) -> bool {
    let haystack = message.to_lowercase();
    let needle = id.to_lowercase();
    if needle.is_empty() {
        return false;
    }

    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric())
            && !after.is_some_and(|c| c.is_alphanumeric())
    })
}
