//! File <-> bead reverse index over the commits of a report

use crate::types::HistoryReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bead's involvement with a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeadReference {
    pub bead_id: String,
    /// Commits that touched the file for this bead, chronological
    pub commit_shas: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
    pub last_touch: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileBeadIndex {
    /// Path -> beads that touched it, ordered by bead ID
    pub file_to_beads: BTreeMap<String, Vec<BeadReference>>,
    /// Bead ID -> sorted paths it touched
    pub bead_to_files: BTreeMap<String, Vec<String>>,
}

impl FileBeadIndex {
    pub fn build(report: &HistoryReport) -> Self {
        let mut index = Self::default();

        for (bead_id, history) in &report.histories {
            let mut per_file: BTreeMap<String, BeadReference> = BTreeMap::new();

            for commit in &history.commits {
                for file in &commit.files {
                    let path = normalize_path(&file.path);
                    if path.is_empty() {
                        continue;
                    }
                    let entry = per_file.entry(path).or_insert_with(|| BeadReference {
                        bead_id: bead_id.clone(),
                        commit_shas: Vec::new(),
                        insertions: 0,
                        deletions: 0,
                        last_touch: commit.timestamp,
                    });
                    if !entry.commit_shas.contains(&commit.sha) {
                        entry.commit_shas.push(commit.sha.clone());
                    }
                    entry.insertions += file.insertions;
                    entry.deletions += file.deletions;
                    entry.last_touch = entry.last_touch.max(commit.timestamp);
                }
            }

            if per_file.is_empty() {
                continue;
            }
            index
                .bead_to_files
                .insert(bead_id.clone(), per_file.keys().cloned().collect());
            for (path, reference) in per_file {
                index.file_to_beads.entry(path).or_default().push(reference);
            }
        }

        index
    }

    pub fn beads_for_file(&self, path: &str) -> &[BeadReference] {
        self.file_to_beads
            .get(&normalize_path(path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn files_for_bead(&self, bead_id: &str) -> &[String] {
        self.bead_to_files
            .get(bead_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_files(&self) -> usize {
        self.file_to_beads.len()
    }
}

/// Forward slashes, no surrounding whitespace, no leading "./"
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeadHistory, CorrelatedCommit, CorrelationMethod, FileChange};
    use chrono::{Duration, TimeZone};

    fn change(path: &str, insertions: usize, deletions: usize) -> FileChange {
        FileChange {
            path: path.to_string(),
            action: "M".to_string(),
            insertions,
            deletions,
        }
    }

    fn commit(bead: &str, sha: &str, hours: i64, files: Vec<FileChange>) -> CorrelatedCommit {
        CorrelatedCommit {
            bead_id: bead.to_string(),
            sha: sha.to_string(),
            short_sha: sha.chars().take(7).collect(),
            message: String::new(),
            author: "Alice".to_string(),
            author_email: String::new(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours),
            files,
            method: CorrelationMethod::CoCommitted,
            confidence: 0.95,
            reason: String::new(),
        }
    }

    fn sample_report() -> HistoryReport {
        let mut report = HistoryReport::default();
        report.histories.insert(
            "bv-1".to_string(),
            BeadHistory {
                bead_id: "bv-1".to_string(),
                commits: vec![
                    commit("bv-1", "c1", 1, vec![change("src/lib.rs", 10, 2), change("./README.md", 1, 0)]),
                    commit("bv-1", "c2", 5, vec![change("src/lib.rs", 3, 3)]),
                ],
                ..Default::default()
            },
        );
        report.histories.insert(
            "bv-2".to_string(),
            BeadHistory {
                bead_id: "bv-2".to_string(),
                commits: vec![commit("bv-2", "c3", 2, vec![change("src\\lib.rs", 1, 1)])],
                ..Default::default()
            },
        );
        report.histories.insert("bv-3".to_string(), BeadHistory::default());
        report
    }

    #[test]
    fn test_build_index() {
        let index = FileBeadIndex::build(&sample_report());

        assert_eq!(index.total_files(), 2);
        let refs = index.beads_for_file("src/lib.rs");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].bead_id, "bv-1");
        assert_eq!(refs[0].commit_shas, vec!["c1", "c2"]);
        assert_eq!(refs[0].insertions, 13);
        assert_eq!(refs[0].deletions, 5);
        assert_eq!(refs[1].bead_id, "bv-2");

        assert_eq!(index.files_for_bead("bv-1"), &["README.md".to_string(), "src/lib.rs".to_string()]);
        assert!(index.files_for_bead("bv-3").is_empty());
        assert!(index.beads_for_file("missing.rs").is_empty());
    }

    #[test]
    fn test_last_touch_is_newest_commit() {
        let index = FileBeadIndex::build(&sample_report());
        let refs = index.beads_for_file("./src/lib.rs");
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 5, 0, 0).unwrap();
        assert_eq!(refs[0].last_touch, expected);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(" ./src/main.rs "), "src/main.rs");
        assert_eq!(normalize_path("src\\a\\b.rs"), "src/a/b.rs");
        assert_eq!(normalize_path("././x"), "x");
        assert_eq!(normalize_path(""), "");
    }
}
