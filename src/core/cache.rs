//! Thread-safe bounded LRU cache for file contents.
//!
//! The cache sits between the aggregation engine and the filesystem:
//! repeated generations over an unchanged selection are served from
//! memory instead of re-reading every file. Two bounds hold at all
//! times, a maximum entry count and a maximum estimated byte footprint.
//! Whenever an insert pushes either bound over its limit, least recently
//! used entries are evicted until both hold again.
//!
//! All locking is internal and no I/O ever happens while the lock is
//! held, so any number of worker threads can share one instance behind
//! an `Arc`.

use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use serde::Serialize;

use crate::core::path_key::PathKey;

/// Fixed per-entry bookkeeping estimate added to the key and content
/// sizes. The same constant is applied on insert and on evict so the
/// running byte total stays consistent.
const ENTRY_OVERHEAD: usize = 64;

/// Point-in-time cache usage, surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub memory_bytes: usize,
    pub max_memory_bytes: usize,
}

impl CacheStats {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn max_memory_mb(&self) -> f64 {
        self.max_memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

struct CacheInner {
    entries: LruCache<PathKey, Arc<str>>,
    memory_bytes: usize,
}

/// Bounded LRU store mapping [`PathKey`]s to immutable file contents.
///
/// Contents are held as `Arc<str>` so a `get` hands out a cheap clone
/// and readers never block each other on the payload.
pub struct ContentCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    max_memory_bytes: usize,
}

impl ContentCache {
    /// Creates a cache bounded by `max_entries` items and
    /// `max_memory_bytes` of estimated memory. A zero bound effectively
    /// disables caching: every insert is evicted again immediately.
    pub fn new(max_entries: usize, max_memory_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                memory_bytes: 0,
            }),
            max_entries,
            max_memory_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned lock only means a panic elsewhere; the map itself
        // is still structurally sound, so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_cost(key_len: usize, content_len: usize) -> usize {
        key_len + content_len + ENTRY_OVERHEAD
    }

    /// Returns the cached content for `key` and marks it most recently
    /// used.
    pub fn get(&self, key: &PathKey) -> Option<Arc<str>> {
        self.lock().entries.get(key).cloned()
    }

    /// Returns whether `key` is cached without touching its recency.
    pub fn contains(&self, key: &PathKey) -> bool {
        self.lock().entries.peek(key).is_some()
    }

    /// Inserts or replaces `key`, then evicts least recently used
    /// entries until both bounds hold again.
    pub fn put(&self, key: PathKey, content: Arc<str>) {
        let key_len = key.len();
        let content_len = content.len();
        let mut inner = self.lock();

        if let Some(old) = inner.entries.put(key, content) {
            let old_cost = Self::entry_cost(key_len, old.len());
            inner.memory_bytes = Self::debit(inner.memory_bytes, old_cost);
        }
        inner.memory_bytes += Self::entry_cost(key_len, content_len);

        while (inner.entries.len() > self.max_entries
            || inner.memory_bytes > self.max_memory_bytes)
            && !inner.entries.is_empty()
        {
            if let Some((evicted_key, evicted)) = inner.entries.pop_lru() {
                let cost = Self::entry_cost(evicted_key.len(), evicted.len());
                inner.memory_bytes = Self::debit(inner.memory_bytes, cost);
            }
        }

        if inner.entries.is_empty() && inner.memory_bytes != 0 {
            tracing::warn!(
                residual = inner.memory_bytes,
                "Cache byte accounting drifted, resetting to zero"
            );
            inner.memory_bytes = 0;
        }
    }

    fn debit(total: usize, cost: usize) -> usize {
        if cost > total {
            tracing::warn!(
                total,
                cost,
                "Cache byte accounting underflow, clamping to zero"
            );
            0
        } else {
            total - cost
        }
    }

    /// Drops every entry. Used on repository refresh so the next
    /// generation re-reads all files from disk.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            max_entries: self.max_entries,
            memory_bytes: inner.memory_bytes,
            max_memory_bytes: self.max_memory_bytes,
        }
    }
}
