//! Per-bead causal chains
//!
//! A chain is the bead's lifecycle events (and optionally its commits) in
//! time order, each linked to its immediate predecessor. The links express
//! chronological adjacency only. They are not derived from blocking
//! dependencies and should not be read as such.

use crate::types::{duration_ms, option_duration_ms, BeadHistory, EventType, HistoryReport};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const MAX_COMMIT_DESC: usize = 50;
const MAX_PATH_DESC_STEPS: usize = 5;

/// Kind of step in a causal chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalEventType {
    Created,
    Claimed,
    Commit,
    Blocked,
    Unblocked,
    Closed,
    Reopened,
}

impl CausalEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CausalEventType::Created => "created",
            CausalEventType::Claimed => "claimed",
            CausalEventType::Commit => "commit",
            CausalEventType::Blocked => "blocked",
            CausalEventType::Unblocked => "unblocked",
            CausalEventType::Closed => "closed",
            CausalEventType::Reopened => "reopened",
        }
    }

    /// Lifecycle mapping; `modified` has no causal counterpart
    fn from_lifecycle(event_type: EventType) -> Option<(Self, &'static str)> {
        match event_type {
            EventType::Created => Some((CausalEventType::Created, "Bead created")),
            EventType::Claimed => Some((CausalEventType::Claimed, "Work started (claimed)")),
            EventType::Closed => Some((CausalEventType::Closed, "Work completed (closed)")),
            EventType::Reopened => Some((CausalEventType::Reopened, "Bead reopened")),
            EventType::Modified => None,
        }
    }
}

impl fmt::Display for CausalEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step in a chain. `id` is its index in `CausalChain::events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEvent {
    pub id: usize,
    #[serde(rename = "type")]
    pub event_type: CausalEventType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enables_ids: Vec<usize>,
    /// Time until the next step
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub duration_next: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalChain {
    pub bead_id: String,
    pub title: String,
    pub status: String,
    pub events: Vec<CausalEvent>,
    /// Number of causal links
    pub edge_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    /// Last event when complete, otherwise the time of analysis
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "duration_ms")]
    pub total_time: Duration,
    pub is_complete: bool,
}

/// Contiguous stretch between a blocked and the following unblocked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedPeriod {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalInsights {
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    #[serde(with = "duration_ms")]
    pub blocked_duration: Duration,
    #[serde(with = "duration_ms")]
    pub active_duration: Duration,
    pub blocked_percentage: f64,
    pub blocked_periods: Vec<BlockedPeriod>,
    pub critical_path: Vec<usize>,
    pub critical_path_desc: String,
    pub commit_count: usize,
    #[serde(with = "option_duration_ms")]
    pub avg_time_between: Option<Duration>,
    #[serde(with = "option_duration_ms")]
    pub longest_gap: Option<Duration>,
    pub longest_gap_desc: String,
    /// Active duration, set only when some time was spent blocked
    #[serde(with = "option_duration_ms")]
    pub estimated_without: Option<Duration>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

impl Default for CausalInsights {
    fn default() -> Self {
        Self {
            total_duration: Duration::zero(),
            blocked_duration: Duration::zero(),
            active_duration: Duration::zero(),
            blocked_percentage: 0.0,
            blocked_periods: Vec::new(),
            critical_path: Vec::new(),
            critical_path_desc: String::new(),
            commit_count: 0,
            avg_time_between: None,
            longest_gap: None,
            longest_gap_desc: String::new(),
            estimated_without: None,
            summary: String::new(),
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalityResult {
    pub generated_at: DateTime<Utc>,
    pub data_hash: String,
    pub chain: CausalChain,
    pub insights: CausalInsights,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CausalityOptions {
    pub include_commits: bool,
    /// Bead ID -> title, used to describe blockers
    pub blocker_titles: BTreeMap<String, String>,
}

impl Default for CausalityOptions {
    fn default() -> Self {
        Self {
            include_commits: true,
            blocker_titles: BTreeMap::new(),
        }
    }
}

struct RawEvent {
    timestamp: DateTime<Utc>,
    event_type: CausalEventType,
    description: String,
    commit_sha: Option<String>,
}

impl HistoryReport {
    /// Causal chain and insights for one bead; `None` if the bead isn't in the report
    pub fn build_causality_chain(&self, bead_id: &str, opts: &CausalityOptions) -> Option<CausalityResult> {
        self.build_causality_chain_at(bead_id, opts, Utc::now())
    }

    /// Same as `build_causality_chain`, with open chains measured up to `now`
    pub fn build_causality_chain_at(
        &self,
        bead_id: &str,
        opts: &CausalityOptions,
        now: DateTime<Utc>,
    ) -> Option<CausalityResult> {
        let history = self.histories.get(bead_id)?;
        let chain = build_chain(history, opts, now);
        let insights = build_insights(&chain, opts);

        Some(CausalityResult {
            generated_at: Utc::now(),
            data_hash: self.data_hash.clone(),
            chain,
            insights,
        })
    }
}

fn build_chain(history: &BeadHistory, opts: &CausalityOptions, now: DateTime<Utc>) -> CausalChain {
    let mut raw: Vec<RawEvent> = history
        .events
        .iter()
        .filter_map(|e| {
            CausalEventType::from_lifecycle(e.event_type).map(|(event_type, desc)| RawEvent {
                timestamp: e.timestamp,
                event_type,
                description: desc.to_string(),
                commit_sha: None,
            })
        })
        .collect();

    if opts.include_commits {
        raw.extend(history.commits.iter().map(|c| RawEvent {
            timestamp: c.timestamp,
            event_type: CausalEventType::Commit,
            description: format!("Commit: {}", truncate_message(&c.message)),
            commit_sha: Some(c.short_sha.clone()),
        }));
    }

    // stable: lifecycle steps stay ahead of commits with the same timestamp
    raw.sort_by_key(|r| r.timestamp);

    let mut events: Vec<CausalEvent> = Vec::with_capacity(raw.len());
    for (id, r) in raw.into_iter().enumerate() {
        let caused_by_id = id.checked_sub(1);
        if let Some(prev) = events.last_mut() {
            prev.enables_ids.push(id);
            prev.duration_next = Some(r.timestamp - prev.timestamp);
        }
        events.push(CausalEvent {
            id,
            event_type: r.event_type,
            timestamp: r.timestamp,
            description: r.description,
            commit_sha: r.commit_sha,
            blocker_id: None,
            caused_by_id,
            enables_ids: Vec::new(),
            duration_next: None,
        });
    }

    let is_complete = history.status == "closed";
    let (start_time, end_time) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => {
            let end = if is_complete { last.timestamp } else { now };
            (Some(first.timestamp), Some(end))
        }
        _ => (None, None),
    };
    let total_time = match (start_time, end_time) {
        (Some(start), Some(end)) => end - start,
        _ => Duration::zero(),
    };

    CausalChain {
        bead_id: history.bead_id.clone(),
        title: history.title.clone(),
        status: history.status.clone(),
        edge_count: events.iter().map(|e| e.enables_ids.len()).sum(),
        events,
        start_time,
        end_time,
        total_time,
        is_complete,
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() > MAX_COMMIT_DESC {
        let head: String = message.chars().take(MAX_COMMIT_DESC - 3).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

/// Pair blocked/unblocked events into periods. An unmatched trailing block is ignored.
pub fn find_blocked_periods(events: &[CausalEvent], blocker_titles: &BTreeMap<String, String>) -> Vec<BlockedPeriod> {
    let mut periods = Vec::new();
    let mut open: Option<(DateTime<Utc>, Option<String>)> = None;

    for event in events {
        match event.event_type {
            CausalEventType::Blocked => open = Some((event.timestamp, event.blocker_id.clone())),
            CausalEventType::Unblocked => {
                if let Some((start, blocker_id)) = open.take() {
                    let blocker_title = blocker_id.as_ref().and_then(|id| blocker_titles.get(id)).cloned();
                    periods.push(BlockedPeriod {
                        start_time: start,
                        end_time: event.timestamp,
                        duration: event.timestamp - start,
                        blocker_id,
                        blocker_title,
                    });
                }
            }
            _ => {}
        }
    }
    periods
}

fn build_insights(chain: &CausalChain, opts: &CausalityOptions) -> CausalInsights {
    let mut insights = CausalInsights {
        total_duration: chain.total_time,
        commit_count: chain
            .events
            .iter()
            .filter(|e| e.event_type == CausalEventType::Commit)
            .count(),
        blocked_periods: find_blocked_periods(&chain.events, &opts.blocker_titles),
        critical_path: chain.events.iter().map(|e| e.id).collect(),
        critical_path_desc: describe_path(&chain.events),
        ..Default::default()
    };

    insights.blocked_duration = insights
        .blocked_periods
        .iter()
        .fold(Duration::zero(), |acc, p| acc + p.duration);
    insights.active_duration = insights.total_duration - insights.blocked_duration;
    insights.blocked_percentage = blocked_percentage(insights.blocked_duration, insights.total_duration);

    let mut longest: Option<(usize, Duration)> = None;
    let mut total_gap = Duration::zero();
    for (i, pair) in chain.events.windows(2).enumerate() {
        let gap = pair[1].timestamp - pair[0].timestamp;
        total_gap = total_gap + gap;
        if longest.map_or(gap > Duration::zero(), |(_, best)| gap > best) {
            longest = Some((i, gap));
        }
    }
    if chain.events.len() > 1 {
        let gaps = (chain.events.len() - 1) as i32;
        insights.avg_time_between = Some(total_gap / gaps);
        let (idx, gap) = longest.unwrap_or((0, Duration::zero()));
        insights.longest_gap = Some(gap);
        insights.longest_gap_desc = format!(
            "{} between {} and {}",
            format_duration_short(gap),
            chain.events[idx].event_type,
            chain.events[idx + 1].event_type
        );
    }

    if insights.blocked_duration > Duration::zero() {
        insights.estimated_without = Some(insights.active_duration);
    }

    insights.summary = build_summary(chain.is_complete, &insights);
    insights.recommendations = generate_recommendations(chain.is_complete, &insights);
    insights
}

fn blocked_percentage(blocked: Duration, total: Duration) -> f64 {
    if total > Duration::zero() {
        blocked.num_milliseconds() as f64 / total.num_milliseconds() as f64 * 100.0
    } else {
        0.0
    }
}

/// "created → claimed → closed", abbreviated to first and last past five steps
fn describe_path(events: &[CausalEvent]) -> String {
    match (events.first(), events.last()) {
        (Some(first), Some(last)) if events.len() > MAX_PATH_DESC_STEPS => {
            format!("{} → ... → {}", first.event_type, last.event_type)
        }
        _ => events
            .iter()
            .map(|e| e.event_type.as_str())
            .collect::<Vec<_>>()
            .join(" → "),
    }
}

fn build_summary(is_complete: bool, insights: &CausalInsights) -> String {
    let total = format_duration_short(insights.total_duration);
    let blocked = format_percent(insights.blocked_percentage);

    if !is_complete {
        if insights.blocked_percentage > 50.0 {
            return format!("In progress, mostly blocked ({} total, {} blocked)", total, blocked);
        }
        return format!("In progress for {} with {} commits", total, insights.commit_count);
    }

    if insights.blocked_percentage > 30.0 {
        format!("Completed in {} ({} blocked)", total, blocked)
    } else {
        format!("Completed in {} with {} commits", total, insights.commit_count)
    }
}

fn generate_recommendations(is_complete: bool, insights: &CausalInsights) -> Vec<String> {
    let week = Duration::days(7);
    let mut recs = Vec::new();

    if insights.blocked_percentage > 50.0 {
        recs.push(format!(
            "High blocked percentage ({}) - consider addressing blockers earlier in the process",
            format_percent(insights.blocked_percentage)
        ));
    }

    if let Some(gap) = insights.longest_gap.filter(|g| *g > week) {
        recs.push(format!(
            "Longest gap of {} - consider breaking work into smaller pieces",
            format_duration_short(gap)
        ));
    }

    if insights.total_duration > week && insights.commit_count < 3 {
        recs.push(format!(
            "Few commits over {} - consider more frequent incremental commits",
            format_duration_short(insights.total_duration)
        ));
    }

    if !is_complete && insights.total_duration > Duration::days(14) {
        recs.push(format!(
            "Open for {} - consider breaking into subtasks or closing if complete",
            format_duration_short(insights.total_duration)
        ));
    }

    if recs.is_empty() {
        recs.push("No significant issues detected in the causal flow".to_string());
    }
    recs
}

/// Coarse duration: 30m, 5h, 3d, 2w, 4mo
pub fn format_duration_short(d: Duration) -> String {
    if d < Duration::hours(1) {
        return format!("{}m", d.num_minutes());
    }
    if d < Duration::days(1) {
        return format!("{}h", d.num_hours());
    }
    let days = d.num_days();
    if days < 7 {
        return format!("{}d", days);
    }
    let weeks = days / 7;
    if weeks < 4 {
        return format!("{}w", weeks);
    }
    format!("{}mo", days / 30)
}

/// Truncated whole percent, e.g. 33.7 -> "33%"
pub fn format_percent(p: f64) -> String {
    format!("{}%", p as i64)
}
