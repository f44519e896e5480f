//! In-memory report cache
//!
//! Reports are keyed by (HEAD, bead set, options). Entries expire after
//! `max_age` and the least recently used entry is evicted past `max_size`.
//! Nothing is persisted.

use crate::error::Result;
use crate::git::GitRunner;
use crate::types::{BeadInfo, CorrelatorOptions, HistoryReport};
use chrono::SecondsFormat;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Identifies a reusable report
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub head_sha: String,
    pub beads_hash: String,
    pub options: String,
}

impl CacheKey {
    /// Same bead set and options, regardless of HEAD
    pub fn same_inputs(&self, other: &CacheKey) -> bool {
        self.beads_hash == other.beads_hash && self.options == other.options
    }
}

/// Build a cache key from the current HEAD, the bead set and the options
pub fn build_cache_key(git: &GitRunner, beads: &[BeadInfo], opts: &CorrelatorOptions) -> Result<CacheKey> {
    Ok(CacheKey {
        head_sha: git.head_sha()?,
        beads_hash: hash_beads(beads),
        options: hash_options(opts),
    })
}

/// SHA-256 over (ID, Title, Status), order-insensitive
pub fn hash_beads(beads: &[BeadInfo]) -> String {
    let mut sorted: Vec<&BeadInfo> = beads.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.status.cmp(&b.status)));

    let mut hasher = Sha256::new();
    for b in sorted {
        hasher.update(b.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(b.title.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(b.status.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Short fingerprint of every option that changes report content
pub fn hash_options(opts: &CorrelatorOptions) -> String {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    };
    let canonical = format!(
        "since={};until={};limit={};bead={};min={};skip_explicit={}",
        fmt_time(opts.since),
        fmt_time(opts.until),
        opts.limit,
        opts.bead_id.as_deref().unwrap_or(""),
        opts.min_confidence,
        opts.skip_explicit
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    report: Arc<HistoryReport>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, max_age: Duration) -> bool {
        self.inserted_at.elapsed() > max_age
    }
}

/// Cache size/limit snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub max_age: Duration,
}

/// TTL + LRU bounded report cache
#[derive(Debug)]
pub struct HistoryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    max_age: Duration,
    max_size: usize,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE, DEFAULT_MAX_SIZE)
    }
}

impl HistoryCache {
    /// `max_size` of 0 is treated as 1
    pub fn new(max_age: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_age,
            max_size: capacity.get(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh report for `key`; expired entries are dropped and read as a miss
    pub fn get(&self, key: &CacheKey) -> Option<Arc<HistoryReport>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.max_age) => Some(Arc::clone(&entry.report)),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, report: Arc<HistoryReport>) {
        self.lock().put(
            key,
            CacheEntry {
                report,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Most recently used fresh report with the same bead set and options as `key`
    pub fn find_same_inputs(&self, key: &CacheKey) -> Option<Arc<HistoryReport>> {
        let entries = self.lock();
        entries
            .iter()
            .find(|(k, entry)| k.same_inputs(key) && !entry.is_expired(self.max_age))
            .map(|(_, entry)| Arc::clone(&entry.report))
    }

    pub fn invalidate(&self) {
        self.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.size(),
            max_size: self.max_size,
            max_age: self.max_age,
        }
    }
}
