//! Query cache keyed by `(scope, topic)`.
//!
//! Each key owns an async cell, so concurrent misses on one key wait for a
//! single fetch instead of racing. The outer LRU lock is only held for
//! bookkeeping and never across an await.

use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use threadpulse_schema::RawItem;

pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Eviction settings. `None` disables the corresponding bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_entries: Option<usize>,
    pub ttl: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            ttl: None,
        }
    }
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: String,
    topic: String,
}

impl CacheKey {
    fn new(scope: &str, topic: &str) -> Self {
        Self {
            scope: scope.to_string(),
            topic: topic.to_string(),
        }
    }
}

struct Entry {
    items: Arc<Vec<RawItem>>,
    fetched_at: Instant,
}

type Cell = Arc<tokio::sync::Mutex<Option<Entry>>>;

pub struct QueryCache {
    policy: CachePolicy,
    slots: Mutex<LruCache<CacheKey, Cell>>,
}

impl QueryCache {
    pub fn new(policy: CachePolicy) -> Self {
        let slots = match policy.max_entries.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            policy,
            slots: Mutex::new(slots),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the stored sequence for the key, fetching and storing it on a miss.
    ///
    /// A hit returns the stored sequence as-is, whatever `limit` it was fetched
    /// with. Successful empty results are stored like any other; a failed fetch
    /// yields an empty sequence and leaves the key unset so the next call retries.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        scope: &str,
        topic: &str,
        limit: usize,
        fetch: F,
    ) -> Arc<Vec<RawItem>>
    where
        F: FnOnce(String, String, usize) -> Fut,
        Fut: Future<Output = Result<Vec<RawItem>, E>>,
        E: Display,
    {
        let key = CacheKey::new(scope, topic);
        let cell = self.cell_for(&key);
        let mut entry = cell.lock().await;

        if let Some(hit) = entry.as_ref().filter(|e| !self.is_expired(e)) {
            tracing::debug!(
                "Cache hit for r/{scope} '{topic}' ({} items)",
                hit.items.len()
            );
            return Arc::clone(&hit.items);
        }

        match fetch(scope.to_string(), topic.to_string(), limit).await {
            Ok(items) => {
                let items = Arc::new(items);
                tracing::info!(
                    "Cache miss for r/{scope} '{topic}', stored {} items",
                    items.len()
                );
                *entry = Some(Entry {
                    items: Arc::clone(&items),
                    fetched_at: Instant::now(),
                });
                items
            }
            Err(e) => {
                tracing::warn!("Fetch for r/{scope} '{topic}' failed, not caching: {e}");
                if entry.is_none() {
                    self.forget(&key, &cell);
                }
                Arc::new(Vec::new())
            }
        }
    }

    /// Drop one key. Returns whether it was present.
    pub fn invalidate(&self, scope: &str, topic: &str) -> bool {
        self.slots().pop(&CacheKey::new(scope, topic)).is_some()
    }

    /// Drop every key. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots();
        let n = slots.len();
        slots.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, key: &CacheKey) -> Cell {
        let mut slots = self.slots();
        if let Some(cell) = slots.get(key) {
            return Arc::clone(cell);
        }

        let cell = Cell::default();
        if let Some((evicted, _)) = slots.push(key.clone(), Arc::clone(&cell)) {
            if &evicted != key {
                tracing::debug!(
                    "Evicted cache entry r/{} '{}'",
                    evicted.scope,
                    evicted.topic
                );
            }
        }
        cell
    }

    /// Remove `key` only while it still maps to `cell`.
    fn forget(&self, key: &CacheKey, cell: &Cell) {
        let mut slots = self.slots();
        if slots.peek(key).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            slots.pop(key);
        }
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| entry.fetched_at.elapsed() >= ttl)
    }

    fn slots(&self) -> MutexGuard<'_, LruCache<CacheKey, Cell>> {
        // A poisoned map only means a panic mid-bookkeeping; the data is still usable.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}
