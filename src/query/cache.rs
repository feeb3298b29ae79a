//! Reference-id cache for masked query results.
//!
//! Every entry remembers the command that produced it. Once an entry is
//! older than the TTL its items are dropped but the command is kept, so a
//! late `expand` can tell the caller how to recompute the list. Such
//! tombstones are evicted for good at twice the TTL, and at most
//! [`MAX_TOMBSTONES`] of them are kept.

use crate::cache as store_io;
use crate::error::StoreResult;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Longest accepted TTL (about a century).
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Expired entries kept for late `expand` calls; the newest win.
pub const MAX_TOMBSTONES: usize = 256;

/// One cached result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `None` once the entry has expired.
    pub items: Option<Vec<Value>>,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
}

/// Outcome of [`ResultCache::retrieve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Hit(Vec<Value>),
    Expired { command: String },
    Unknown,
}

/// What one [`ResultCache::cleanup`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup {
    /// Entries whose items were dropped.
    pub expired: usize,
    /// Entries removed entirely.
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub live: usize,
    pub expired: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Load entries saved by [`ResultCache::save`]. A missing or unreadable
    /// file yields an empty cache.
    pub fn load(path: &Path, ttl_secs: u64) -> Self {
        let cache = Self::new(ttl_secs);
        match store_io::read_json::<Vec<(String, CacheEntry)>>(path) {
            Ok(Some(entries)) => {
                for (id, entry) in entries {
                    cache.entries.insert(id, entry);
                }
                cache.cleanup();
            }
            Ok(None) => {}
            Err(e) => debug!("Ignoring unreadable query cache {}: {}", path.display(), e),
        }
        cache
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let mut entries: Vec<(String, CacheEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        store_io::write_json(path, &entries)
    }

    /// Store a full result list and return its reference id.
    pub fn store(&self, items: Vec<Value>, command: &str) -> String {
        let id = loop {
            let candidate = new_ref_id();
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!("Cached {} items for `{}` as {}", items.len(), command, id);
        self.entries.insert(
            id.clone(),
            CacheEntry {
                items: Some(items),
                command: command.to_string(),
                created_at: Utc::now(),
                access_count: 0,
            },
        );
        id
    }

    pub fn retrieve(&self, id: &str) -> Retrieval {
        let Some(mut entry) = self.entries.get_mut(id) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Retrieval::Unknown;
        };
        if self.is_expired(&entry) {
            entry.items = None;
        }
        match entry.items.clone() {
            Some(items) => {
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Retrieval::Hit(items)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Retrieval::Expired {
                    command: entry.command.clone(),
                }
            }
        }
    }

    /// Drop the items of every expired entry and evict tombstones past
    /// their grace period or beyond [`MAX_TOMBSTONES`].
    pub fn cleanup(&self) -> Cleanup {
        let now = Utc::now();
        let grace = self.ttl * 2;
        let mut report = Cleanup::default();
        self.entries.retain(|_, entry| {
            let age = now.signed_duration_since(entry.created_at);
            if age >= grace {
                report.evicted += 1;
                return false;
            }
            if age >= self.ttl && entry.items.is_some() {
                entry.items = None;
                report.expired += 1;
            }
            true
        });

        let mut tombstones: Vec<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter(|e| e.items.is_none())
            .map(|e| (e.key().clone(), e.created_at))
            .collect();
        if tombstones.len() > MAX_TOMBSTONES {
            tombstones.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (id, _) in tombstones.drain(MAX_TOMBSTONES..) {
                self.entries.remove(&id);
                report.evicted += 1;
            }
        }
        if report.evicted > 0 {
            debug!("Evicted {} cached reference ids", report.evicted);
        }
        report
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let live = self
            .entries
            .iter()
            .filter(|e| e.items.is_some() && !self.is_expired(e))
            .count();
        CacheStats {
            live,
            expired: self.entries.len() - live,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        Utc::now().signed_duration_since(entry.created_at) >= self.ttl
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// `ref_` followed by eight hex digits.
fn new_ref_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("ref_{}", &hex[..8])
}
