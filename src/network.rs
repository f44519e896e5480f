//! Impact network
//!
//! Beads become nodes; shared commits, shared files and blocking dependencies
//! become weighted edges. Strongly connected groups (edges of weight 2 or
//! more) are reported as clusters.

use crate::file_index::FileBeadIndex;
use crate::types::{short_sha, HistoryReport, Issue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Priority for beads without issue data
pub const DEFAULT_PRIORITY: i32 = 2;

/// Minimum edge weight considered for clustering
pub const CLUSTER_MIN_WEIGHT: usize = 2;

pub const MIN_SUB_NETWORK_DEPTH: usize = 1;
pub const MAX_SUB_NETWORK_DEPTH: usize = 3;

const MAX_EDGE_DETAILS: usize = 5;
const MAX_LABEL_TITLE: usize = 30;
const TOP_CLUSTERS: usize = 5;
const TOP_CONNECTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEdgeType {
    SharedCommit,
    SharedFile,
    Dependency,
}

impl NetworkEdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkEdgeType::SharedCommit => "shared_commit",
            NetworkEdgeType::SharedFile => "shared_file",
            NetworkEdgeType::Dependency => "dependency",
        }
    }
}

impl fmt::Display for NetworkEdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undirected connection; `from_bead` is always the lexicographically smaller ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub from_bead: String,
    pub to_bead: String,
    pub edge_type: NetworkEdgeType,
    /// Shared commits, shared files or dependency count
    pub weight: usize,
    /// Up to five sample short SHAs, paths or "a -> b" dependency pairs
    pub details: Vec<String>,
}

impl NetworkEdge {
    fn touches(&self, bead_id: &str) -> bool {
        self.from_bead == bead_id || self.to_bead == bead_id
    }

    fn within(&self, beads: &BTreeSet<&str>) -> bool {
        beads.contains(self.from_bead.as_str()) && beads.contains(self.to_bead.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub bead_id: String,
    pub title: String,
    pub status: String,
    pub priority: i32,
    pub last_activity: Option<DateTime<Utc>>,
    /// Edge endpoints touching this node, across all edge types
    pub degree: usize,
    pub cluster_id: Option<usize>,
    pub commit_count: usize,
    pub file_count: usize,
    /// Internal connectivity of the node's cluster, 0 when unclustered
    pub connectivity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeadCluster {
    pub cluster_id: usize,
    pub bead_ids: Vec<String>,
    pub label: String,
    pub internal_edges: usize,
    pub external_edges: usize,
    /// Connected member pairs over possible pairs, in [0, 1]
    pub internal_connectivity: f64,
    pub central_bead: String,
    /// Files touched by at least two members
    pub shared_files: Vec<String>,
    pub total_commits: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub cluster_count: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    /// Edges over possible node pairs
    pub density: f64,
    pub isolated_nodes: usize,
    pub largest_cluster: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactNetwork {
    pub generated_at: DateTime<Utc>,
    pub data_hash: String,
    pub nodes: BTreeMap<String, NetworkNode>,
    pub edges: Vec<NetworkEdge>,
    pub clusters: Vec<BeadCluster>,
    pub stats: NetworkStats,
}

/// Network summary, optionally focused on one bead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactNetworkResult {
    pub generated_at: DateTime<Utc>,
    pub data_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bead_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    pub network: ImpactNetwork,
    pub stats: NetworkStats,
    /// Largest clusters of the full network
    pub top_clusters: Vec<BeadCluster>,
    /// Most connected nodes of `network`
    pub top_connected: Vec<NetworkNode>,
}

/// Builds an `ImpactNetwork` from a report and optional issue data
#[derive(Debug)]
pub struct NetworkBuilder<'a> {
    report: &'a HistoryReport,
    file_index: FileBeadIndex,
    issues: &'a [Issue],
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(report: &'a HistoryReport) -> Self {
        Self::with_issues(report, &[])
    }

    pub fn with_issues(report: &'a HistoryReport, issues: &'a [Issue]) -> Self {
        Self {
            report,
            file_index: FileBeadIndex::build(report),
            issues,
        }
    }

    pub fn file_index(&self) -> &FileBeadIndex {
        &self.file_index
    }

    pub fn build(&self) -> ImpactNetwork {
        let mut nodes = self.build_nodes();

        let mut edges = Vec::new();
        edges.extend(self.shared_commit_edges(&nodes));
        edges.extend(self.shared_file_edges(&nodes));
        edges.extend(self.dependency_edges(&nodes));

        assign_degrees(&mut nodes, &edges);
        let clusters = self.detect_clusters(&mut nodes, &edges);
        let stats = calculate_stats(&nodes, &edges, &clusters);

        tracing::debug!(
            nodes = stats.total_nodes,
            edges = stats.total_edges,
            clusters = stats.cluster_count,
            "built impact network"
        );

        ImpactNetwork {
            generated_at: Utc::now(),
            data_hash: self.report.data_hash.clone(),
            nodes,
            edges,
            clusters,
            stats,
        }
    }

    fn build_nodes(&self) -> BTreeMap<String, NetworkNode> {
        let priorities: BTreeMap<&str, i32> = self
            .issues
            .iter()
            .filter(|i| !i.id.is_empty())
            .map(|i| (i.id.as_str(), i.priority))
            .collect();

        self.report
            .histories
            .iter()
            .map(|(bead_id, history)| {
                let m = &history.milestones;
                let last_activity = m
                    .closed
                    .as_ref()
                    .or(m.claimed.as_ref())
                    .or(m.created.as_ref())
                    .map(|e| e.timestamp)
                    .or_else(|| history.commits.last().map(|c| c.timestamp));

                let node = NetworkNode {
                    bead_id: bead_id.clone(),
                    title: history.title.clone(),
                    status: history.status.clone(),
                    priority: priorities
                        .get(bead_id.as_str())
                        .copied()
                        .unwrap_or(DEFAULT_PRIORITY),
                    last_activity,
                    degree: 0,
                    cluster_id: None,
                    commit_count: history.commits.len(),
                    file_count: self.file_index.files_for_bead(bead_id).len(),
                    connectivity: 0.0,
                };
                (bead_id.clone(), node)
            })
            .collect()
    }

    fn shared_commit_edges(&self, nodes: &BTreeMap<String, NetworkNode>) -> Vec<NetworkEdge> {
        let mut acc = EdgeAccumulator::default();
        for (sha, bead_ids) in &self.report.commit_index {
            for_each_pair(bead_ids.iter().map(String::as_str), |a, b| {
                if nodes.contains_key(a) && nodes.contains_key(b) {
                    acc.add(a, b, short_sha(sha));
                }
            });
        }
        acc.into_edges(NetworkEdgeType::SharedCommit)
    }

    fn shared_file_edges(&self, nodes: &BTreeMap<String, NetworkNode>) -> Vec<NetworkEdge> {
        let mut acc = EdgeAccumulator::default();
        for (path, refs) in &self.file_index.file_to_beads {
            for_each_pair(refs.iter().map(|r| r.bead_id.as_str()), |a, b| {
                if nodes.contains_key(a) && nodes.contains_key(b) {
                    acc.add(a, b, path.clone());
                }
            });
        }
        acc.into_edges(NetworkEdgeType::SharedFile)
    }

    /// Only blocking dependency types produce edges
    fn dependency_edges(&self, nodes: &BTreeMap<String, NetworkNode>) -> Vec<NetworkEdge> {
        let mut acc = EdgeAccumulator::default();
        for issue in self.issues {
            if issue.id.is_empty() || !nodes.contains_key(&issue.id) {
                continue;
            }
            for dep in &issue.dependencies {
                let to = dep.depends_on_id.as_str();
                if !dep.dep_type.is_blocking() || to.is_empty() || to == issue.id || !nodes.contains_key(to) {
                    continue;
                }
                acc.add(&issue.id, to, format!("{} -> {}", issue.id, to));
            }
        }
        acc.into_edges(NetworkEdgeType::Dependency)
    }

    /// Connected components over strong edges; singletons are dropped
    fn detect_clusters(&self, nodes: &mut BTreeMap<String, NetworkNode>, edges: &[NetworkEdge]) -> Vec<BeadCluster> {
        let mut adj: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in edges.iter().filter(|e| e.weight >= CLUSTER_MIN_WEIGHT) {
            adj.entry(edge.from_bead.as_str())
                .or_default()
                .insert(edge.to_bead.as_str());
            adj.entry(edge.to_bead.as_str())
                .or_default()
                .insert(edge.from_bead.as_str());
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut components: Vec<Vec<String>> = Vec::new();

        for start in adj.keys().copied() {
            if visited.contains(start) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(current) = stack.pop() {
                if !visited.insert(current) {
                    continue;
                }
                component.push(current.to_string());
                if let Some(neighbors) = adj.get(current) {
                    stack.extend(neighbors.iter().copied().filter(|n| !visited.contains(n)));
                }
            }
            if component.len() >= 2 {
                component.sort();
                components.push(component);
            }
        }

        // stable: equal-sized clusters keep discovery (bead ID) order
        components.sort_by(|a, b| b.len().cmp(&a.len()));

        let clusters: Vec<BeadCluster> = components
            .into_iter()
            .enumerate()
            .map(|(id, members)| self.build_cluster(id, members, nodes, edges))
            .collect();

        for cluster in &clusters {
            for bead_id in &cluster.bead_ids {
                if let Some(node) = nodes.get_mut(bead_id) {
                    node.cluster_id = Some(cluster.cluster_id);
                    node.connectivity = cluster.internal_connectivity;
                }
            }
        }
        clusters
    }

    fn build_cluster(
        &self,
        cluster_id: usize,
        bead_ids: Vec<String>,
        nodes: &BTreeMap<String, NetworkNode>,
        edges: &[NetworkEdge],
    ) -> BeadCluster {
        let members: BTreeSet<&str> = bead_ids.iter().map(String::as_str).collect();

        let mut internal_edges = 0;
        let mut external_edges = 0;
        let mut connected_pairs: BTreeSet<(&str, &str)> = BTreeSet::new();
        for edge in edges {
            let from_in = members.contains(edge.from_bead.as_str());
            let to_in = members.contains(edge.to_bead.as_str());
            if from_in && to_in {
                internal_edges += 1;
                connected_pairs.insert((edge.from_bead.as_str(), edge.to_bead.as_str()));
            } else if from_in || to_in {
                external_edges += 1;
            }
        }

        let n = bead_ids.len();
        let max_pairs = n * n.saturating_sub(1) / 2;
        let internal_connectivity = if max_pairs > 0 {
            connected_pairs.len() as f64 / max_pairs as f64
        } else {
            0.0
        };

        let mut central_bead = String::new();
        let mut best_degree = 0;
        for bead_id in &bead_ids {
            let internal_degree = edges
                .iter()
                .filter(|e| e.touches(bead_id) && e.within(&members))
                .count();
            if internal_degree > best_degree {
                best_degree = internal_degree;
                central_bead = bead_id.clone();
            }
        }

        let total_commits = bead_ids
            .iter()
            .filter_map(|id| nodes.get(id))
            .map(|n| n.commit_count)
            .sum();

        let mut file_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for bead_id in &bead_ids {
            for file in self.file_index.files_for_bead(bead_id) {
                *file_counts.entry(file.as_str()).or_default() += 1;
            }
        }
        let shared_files: Vec<String> = file_counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(file, _)| file.to_string())
            .collect();

        let label = self.cluster_label(&bead_ids, &shared_files);

        BeadCluster {
            cluster_id,
            bead_ids,
            label,
            internal_edges,
            external_edges,
            internal_connectivity,
            central_bead,
            shared_files,
            total_commits,
        }
    }

    /// Common directory of the shared files, else the first bead's title, else "cluster"
    fn cluster_label(&self, bead_ids: &[String], shared_files: &[String]) -> String {
        let prefix = common_path_prefix(shared_files);
        if prefix.len() > 2 {
            return prefix.trim_end_matches('/').to_string();
        }

        if let Some(history) = bead_ids.first().and_then(|id| self.report.histories.get(id)) {
            let title = &history.title;
            if title.chars().count() > MAX_LABEL_TITLE {
                let head: String = title.chars().take(MAX_LABEL_TITLE).collect();
                return format!("{}...", head);
            }
            return title.clone();
        }

        "cluster".to_string()
    }
}

/// Weight and sample details per canonical (smaller, larger) bead pair
#[derive(Default)]
struct EdgeAccumulator {
    pairs: BTreeMap<(String, String), (usize, Vec<String>)>,
}

impl EdgeAccumulator {
    fn add(&mut self, a: &str, b: &str, detail: String) {
        if a == b {
            return;
        }
        let key = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        let (weight, details) = self.pairs.entry(key).or_default();
        *weight += 1;
        if details.len() < MAX_EDGE_DETAILS {
            details.push(detail);
        }
    }

    fn into_edges(self, edge_type: NetworkEdgeType) -> Vec<NetworkEdge> {
        self.pairs
            .into_iter()
            .map(|((from_bead, to_bead), (weight, details))| NetworkEdge {
                from_bead,
                to_bead,
                edge_type,
                weight,
                details,
            })
            .collect()
    }
}

fn for_each_pair<'s>(items: impl Iterator<Item = &'s str>, mut f: impl FnMut(&'s str, &'s str)) {
    let items: Vec<&str> = items.collect();
    for (i, a) in items.iter().enumerate() {
        for b in &items[i + 1..] {
            f(*a, *b);
        }
    }
}

fn assign_degrees(nodes: &mut BTreeMap<String, NetworkNode>, edges: &[NetworkEdge]) {
    for node in nodes.values_mut() {
        node.degree = 0;
    }
    for edge in edges {
        for end in [&edge.from_bead, &edge.to_bead] {
            if let Some(node) = nodes.get_mut(end) {
                node.degree += 1;
            }
        }
    }
}

fn calculate_stats(
    nodes: &BTreeMap<String, NetworkNode>,
    edges: &[NetworkEdge],
    clusters: &[BeadCluster],
) -> NetworkStats {
    let total_nodes = nodes.len();
    let total_degree: usize = nodes.values().map(|n| n.degree).sum();
    let max_pairs = total_nodes * total_nodes.saturating_sub(1) / 2;

    NetworkStats {
        total_nodes,
        total_edges: edges.len(),
        cluster_count: clusters.len(),
        avg_degree: if total_nodes > 0 {
            total_degree as f64 / total_nodes as f64
        } else {
            0.0
        },
        max_degree: nodes.values().map(|n| n.degree).max().unwrap_or(0),
        density: if max_pairs > 0 {
            edges.len() as f64 / max_pairs as f64
        } else {
            0.0
        },
        isolated_nodes: nodes.values().filter(|n| n.degree == 0).count(),
        largest_cluster: clusters.iter().map(|c| c.bead_ids.len()).max().unwrap_or(0),
    }
}

/// Longest shared directory prefix (with trailing '/'), empty if none
pub fn common_path_prefix(files: &[String]) -> String {
    let Some((first, rest)) = files.split_first() else {
        return String::new();
    };
    let mut prefix = match first.rfind('/') {
        Some(i) => &first[..=i],
        None => return String::new(),
    };

    for file in rest {
        while !prefix.is_empty() && !file.starts_with(prefix) {
            let trimmed = prefix.trim_end_matches('/');
            prefix = match trimmed.rfind('/') {
                Some(i) => &trimmed[..=i],
                None => "",
            };
        }
    }
    prefix.to_string()
}

impl ImpactNetwork {
    /// Nodes within `depth` hops of `bead_id` (depth clamped to [1, 3]) and the edges among them.
    ///
    /// Degrees and stats are recomputed over the sub-network; clusters are not carried over.
    pub fn get_sub_network(&self, bead_id: &str, depth: usize) -> ImpactNetwork {
        let depth = depth.clamp(MIN_SUB_NETWORK_DEPTH, MAX_SUB_NETWORK_DEPTH);

        let mut adj: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in &self.edges {
            adj.entry(edge.from_bead.as_str())
                .or_default()
                .insert(edge.to_bead.as_str());
            adj.entry(edge.to_bead.as_str())
                .or_default()
                .insert(edge.from_bead.as_str());
        }

        let mut in_radius: BTreeSet<&str> = BTreeSet::new();
        let mut queue = VecDeque::from([(bead_id, 0usize)]);
        while let Some((current, level)) = queue.pop_front() {
            if !in_radius.insert(current) || level >= depth {
                continue;
            }
            if let Some(neighbors) = adj.get(current) {
                queue.extend(
                    neighbors
                        .iter()
                        .filter(|n| !in_radius.contains(*n))
                        .map(|n| (*n, level + 1)),
                );
            }
        }

        let mut nodes: BTreeMap<String, NetworkNode> = self
            .nodes
            .iter()
            .filter(|(id, _)| in_radius.contains(id.as_str()))
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();
        let edges: Vec<NetworkEdge> = self
            .edges
            .iter()
            .filter(|e| e.within(&in_radius))
            .cloned()
            .collect();

        assign_degrees(&mut nodes, &edges);
        let stats = calculate_stats(&nodes, &edges, &[]);

        ImpactNetwork {
            generated_at: self.generated_at,
            data_hash: self.data_hash.clone(),
            nodes,
            edges,
            clusters: Vec::new(),
            stats,
        }
    }

    /// Result for the whole network, or for the sub-network around `bead_id`
    pub fn to_result(&self, bead_id: Option<&str>, depth: usize) -> ImpactNetworkResult {
        let (network, depth) = match bead_id {
            Some(id) => (
                self.get_sub_network(id, depth),
                Some(depth.clamp(MIN_SUB_NETWORK_DEPTH, MAX_SUB_NETWORK_DEPTH)),
            ),
            None => (self.clone(), None),
        };

        let mut top_connected: Vec<NetworkNode> = network.nodes.values().cloned().collect();
        // stable over bead ID order
        top_connected.sort_by(|a, b| b.degree.cmp(&a.degree));
        top_connected.truncate(TOP_CONNECTED);

        ImpactNetworkResult {
            generated_at: self.generated_at,
            data_hash: self.data_hash.clone(),
            bead_id: bead_id.map(String::from),
            depth,
            stats: network.stats.clone(),
            top_clusters: self.clusters.iter().take(TOP_CLUSTERS).cloned().collect(),
            top_connected,
            network,
        }
    }
}
