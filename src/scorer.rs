//! Confidence scoring for bead-commit correlations
//!
//! Each correlation method has a confidence range. When several methods find
//! the same (commit, bead) pair their scores are combined by a
//! `ConfidenceModel`; the default `HeadroomBoost` starts from the strongest
//! signal and closes a tenth of the remaining headroom per extra signal,
//! weighted by that signal's strength, capped at 0.99.

use crate::types::{BeadHistory, CorrelatedCommit, CorrelationMethod, FileChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Expected confidence bounds for a correlation method
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceRange {
    pub method: CorrelationMethod,
    pub min: f64,
    pub max: f64,
    pub desc: &'static str,
}

/// Confidence range for a method
pub fn method_range(method: CorrelationMethod) -> ConfidenceRange {
    match method {
        CorrelationMethod::CoCommitted => ConfidenceRange {
            method,
            min: 0.85,
            max: 0.99,
            desc: "Changed in same commit as bead update (direct causation)",
        },
        CorrelationMethod::ExplicitId => ConfidenceRange {
            method,
            min: 0.70,
            max: 0.99,
            desc: "Commit message explicitly references bead ID (developer intent)",
        },
        CorrelationMethod::TemporalAuthor => ConfidenceRange {
            method,
            min: 0.20,
            max: 0.85,
            desc: "By same author during bead's active window (temporal correlation)",
        },
    }
}

/// Clamp a raw score into its method's range
pub fn clamp_to_range(method: CorrelationMethod, confidence: f64) -> f64 {
    let range = method_range(method);
    confidence.clamp(range.min, range.max)
}

/// A single confidence signal from one correlation method
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceSignal {
    pub method: CorrelationMethod,
    pub confidence: f64,
    pub reason: String,
}

impl From<&CorrelatedCommit> for ConfidenceSignal {
    fn from(c: &CorrelatedCommit) -> Self {
        Self {
            method: c.method,
            confidence: c.confidence,
            reason: c.reason.clone(),
        }
    }
}

/// Formula for combining two or more scores into one
pub trait ConfidenceModel: fmt::Debug + Send + Sync {
    /// `scores` is sorted descending and holds at least two entries
    fn combine(&self, scores: &[f64]) -> f64;
}

/// Highest score as base, each further score adds `(1 - base) * multiplier * score`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadroomBoost {
    pub multiplier: f64,
    pub cap: f64,
}

impl Default for HeadroomBoost {
    fn default() -> Self {
        Self {
            multiplier: 0.1,
            cap: 0.99,
        }
    }
}

impl ConfidenceModel for HeadroomBoost {
    fn combine(&self, scores: &[f64]) -> f64 {
        let Some((&first, rest)) = scores.split_first() else {
            return 0.0;
        };

        let mut base = first;
        for &score in rest {
            base += (1.0 - base) * self.multiplier * score;
        }

        base.min(self.cap)
    }
}

/// Aggregate confidence statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub total: usize,
    pub by_method: BTreeMap<String, usize>,
    /// high / medium / low
    pub by_confidence_group: BTreeMap<String, usize>,
    pub average_by_method: BTreeMap<String, f64>,
}

/// Calculates and combines confidence scores
#[derive(Debug)]
pub struct Scorer {
    model: Box<dyn ConfidenceModel>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer {
    pub fn new() -> Self {
        Self::with_model(Box::new(HeadroomBoost::default()))
    }

    pub fn with_model(model: Box<dyn ConfidenceModel>) -> Self {
        Self { model }
    }

    /// True if the score lies inside the method's range
    pub fn validate_confidence(&self, method: CorrelationMethod, confidence: f64) -> bool {
        let range = method_range(method);
        confidence >= range.min && confidence <= range.max
    }

    /// Combine signals. Empty is 0, one passes through unchanged.
    pub fn combine_confidence(&self, signals: &[ConfidenceSignal]) -> f64 {
        match signals {
            [] => 0.0,
            [only] => only.confidence,
            _ => {
                let mut scores: Vec<f64> = signals.iter().map(|s| s.confidence).collect();
                scores.sort_by(|a, b| b.total_cmp(a));
                self.model.combine(&scores)
            }
        }
    }

    /// "Multiple signals: reason (95%); reason (90%)", strongest first
    pub fn combine_reasons(&self, signals: &[ConfidenceSignal]) -> String {
        match signals {
            [] => String::new(),
            [only] => only.reason.clone(),
            _ => {
                let mut sorted: Vec<&ConfidenceSignal> = signals.iter().collect();
                sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

                let parts: Vec<String> = sorted
                    .iter()
                    .map(|s| format!("{} ({})", s.reason, format_confidence(s.confidence)))
                    .collect();
                format!("Multiple signals: {}", parts.join("; "))
            }
        }
    }

    /// Human-readable explanation, leveled relative to the method's range
    pub fn explain_confidence(&self, method: CorrelationMethod, confidence: f64, details: &str) -> String {
        let range = method_range(method);
        let span = if range.max > range.min {
            range.max - range.min
        } else {
            1.0
        };
        let normalized = (confidence - range.min) / span;

        let level = if normalized >= 0.8 {
            "Very high"
        } else if normalized >= 0.6 {
            "High"
        } else if normalized >= 0.4 {
            "Moderate"
        } else if normalized >= 0.2 {
            "Low"
        } else {
            "Very low"
        };

        let mut text = format!(
            "{} confidence ({}): {}",
            level,
            format_confidence(confidence),
            range.desc
        );
        if !details.is_empty() {
            text.push_str(". ");
            text.push_str(details);
        }
        text
    }

    /// Keep commits with confidence >= threshold; a threshold <= 0 keeps everything
    pub fn filter_by_confidence(&self, commits: Vec<CorrelatedCommit>, min_confidence: f64) -> Vec<CorrelatedCommit> {
        if min_confidence <= 0.0 {
            return commits;
        }
        commits
            .into_iter()
            .filter(|c| c.confidence >= min_confidence)
            .collect()
    }

    /// Drop low-confidence commits from every history
    pub fn filter_histories_by_confidence(
        &self,
        histories: BTreeMap<String, BeadHistory>,
        min_confidence: f64,
    ) -> BTreeMap<String, BeadHistory> {
        if min_confidence <= 0.0 {
            return histories;
        }
        histories
            .into_iter()
            .map(|(id, mut h)| {
                h.commits = self.filter_by_confidence(std::mem::take(&mut h.commits), min_confidence);
                (id, h)
            })
            .collect()
    }

    /// Merge commits from several sources, deduplicating by (SHA, bead).
    ///
    /// Repeats of the same method keep their strongest entry, so merging a set
    /// with itself changes nothing. Pairs found by several methods get a
    /// combined confidence and reason, the strongest method's label, and the
    /// union of file lists. Output is sorted by confidence descending.
    pub fn merge_commits(&self, sources: &[&[CorrelatedCommit]]) -> Vec<CorrelatedCommit> {
        let mut groups: BTreeMap<(String, String), BTreeMap<CorrelationMethod, CorrelatedCommit>> = BTreeMap::new();

        for commit in sources.iter().flat_map(|s| s.iter()) {
            let by_method = groups
                .entry((commit.sha.clone(), commit.bead_id.clone()))
                .or_default();
            match by_method.get(&commit.method) {
                Some(existing) if existing.confidence >= commit.confidence => {}
                _ => {
                    by_method.insert(commit.method, commit.clone());
                }
            }
        }

        let mut merged: Vec<CorrelatedCommit> = groups
            .into_values()
            .filter_map(|by_method| {
                let mut contributors: Vec<CorrelatedCommit> = by_method.into_values().collect();
                if contributors.len() <= 1 {
                    return contributors.pop();
                }

                contributors.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                let signals: Vec<ConfidenceSignal> = contributors.iter().map(ConfidenceSignal::from).collect();

                let mut seen = HashSet::new();
                let files: Vec<FileChange> = contributors
                    .iter()
                    .flat_map(|c| c.files.iter())
                    .filter(|f| seen.insert(f.path.clone()))
                    .cloned()
                    .collect();

                let mut result = contributors[0].clone();
                result.confidence = self.combine_confidence(&signals);
                result.reason = self.combine_reasons(&signals);
                result.files = files;
                Some(result)
            })
            .collect();

        merged.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.sha.cmp(&b.sha))
                .then_with(|| a.bead_id.cmp(&b.bead_id))
        });
        merged
    }

    /// Per-method counts and averages, and high/medium/low groups
    pub fn calculate_stats(&self, commits: &[CorrelatedCommit]) -> ConfidenceStats {
        let mut stats = ConfidenceStats {
            total: commits.len(),
            ..Default::default()
        };
        let mut sums: BTreeMap<String, f64> = BTreeMap::new();

        for c in commits {
            let method = c.method.to_string();
            *stats.by_method.entry(method.clone()).or_default() += 1;
            *sums.entry(method).or_default() += c.confidence;

            let group = if c.confidence >= 0.8 {
                "high"
            } else if c.confidence >= 0.5 {
                "medium"
            } else {
                "low"
            };
            *stats.by_confidence_group.entry(group.to_string()).or_default() += 1;
        }

        for (method, sum) in sums {
            let count = stats.by_method.get(&method).copied().unwrap_or(0);
            if count > 0 {
                stats.average_by_method.insert(method, sum / count as f64);
            }
        }

        stats
    }
}

/// Absolute confidence level label
pub fn confidence_level(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "very high"
    } else if confidence >= 0.75 {
        "high"
    } else if confidence >= 0.5 {
        "moderate"
    } else if confidence >= 0.3 {
        "low"
    } else {
        "very low"
    }
}

/// Whole-number percentage, e.g. "95%"
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}
