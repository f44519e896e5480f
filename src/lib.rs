//! bead-history - Git history correlation for beads
//!
//! Reconstruct each bead's lifecycle from the history of `.beads/beads.jsonl`,
//! link it to the commits that implemented it, and analyze the result.
//!
//! # Overview
//!
//! A report is built in stages:
//!
//! | Stage | Module |
//! |-------|--------|
//! | Lifecycle events from diffs of the bead file | `extractor` |
//! | Commits touched alongside a status change | `cocommit` |
//! | Commits whose message names a bead | `explicit` |
//! | Confidence ranges and signal combination | `scorer` |
//! | Per-bead histories and the aggregate report | `correlator` |
//! | Cached and incremental reports | `cache`, `incremental` |
//!
//! Reports feed two analyses: per-bead causal chains (`causality`) and the
//! cross-bead impact network (`network`).
//!
//! # Quick Start
//!
//! ```no_run
//! use bead_history::{BeadInfo, CorrelatorOptions, IncrementalCorrelator, NetworkBuilder};
//!
//! let correlator = IncrementalCorrelator::new(".");
//! let beads = vec![BeadInfo::new("bv-1", "Add login", "closed")];
//!
//! let report = correlator.generate_report(&beads, &CorrelatorOptions::default()).unwrap();
//! println!("{} commits correlated", report.stats.total_commits);
//!
//! let network = NetworkBuilder::new(&report).build();
//! println!("{} clusters", network.clusters.len());
//! ```

pub mod cache;
pub mod causality;
pub mod cocommit;
pub mod config;
pub mod correlator;
pub mod error;
pub mod explicit;
pub mod extractor;
pub mod file_index;
pub mod git;
pub mod incremental;
pub mod network;
pub mod scorer;
pub mod types;

pub use cache::{CacheKey, CacheStats, HistoryCache};
pub use causality::{
    BlockedPeriod, CausalChain, CausalEvent, CausalEventType, CausalInsights, CausalityOptions, CausalityResult,
};
pub use cocommit::CoCommitExtractor;
pub use config::Config;
pub use correlator::{validate_repository, Correlator};
pub use error::{CorrelationError, Result};
pub use explicit::{ExplicitMatch, ExplicitMatcher, IdMatch, MatchType};
pub use extractor::Extractor;
pub use file_index::{BeadReference, FileBeadIndex};
pub use git::GitRunner;
pub use incremental::{IncrementalCorrelator, IncrementalCorrelatorStats, IncrementalUpdateResult, INCREMENTAL_THRESHOLD};
pub use network::{
    BeadCluster, ImpactNetwork, ImpactNetworkResult, NetworkBuilder, NetworkEdge, NetworkEdgeType, NetworkNode,
    NetworkStats,
};
pub use scorer::{ConfidenceModel, ConfidenceRange, ConfidenceStats, HeadroomBoost, Scorer};
pub use types::{
    BeadEvent, BeadHistory, BeadInfo, BeadMilestones, CommitIndex, CorrelatedCommit, CorrelationMethod,
    CorrelatorOptions, CycleTime, Dependency, DependencyType, EventType, ExtractOptions, FileChange, HistoryReport,
    HistoryStats, Issue, BEADS_FILE,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        assert_eq!(BEADS_FILE, ".beads/beads.jsonl");
        assert_eq!(INCREMENTAL_THRESHOLD, 100);
        let _ = Scorer::default();
    }
}
