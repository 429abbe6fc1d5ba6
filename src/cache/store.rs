//! Cache storage.
//!
//! One [`QuerySlot`] per value type, all sharing the cache-wide epochs that
//! order fetches against invalidations and resets.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::application::pagination::FeedPages;
use crate::domain::entities::{PostRecord, ProfileRecord};

use super::config::{CacheConfig, non_zero};
use super::keys::{QueryFilter, QueryKey};
use super::lock::recover;

/// Counter values observed when a fetch started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEpoch {
    invalidation: u64,
    reset: u64,
}

#[derive(Debug, Default)]
struct Epochs {
    invalidation: AtomicU64,
    reset: AtomicU64,
}

impl Epochs {
    fn current(&self) -> CacheEpoch {
        CacheEpoch {
            invalidation: self.invalidation.load(Ordering::SeqCst),
            reset: self.reset.load(Ordering::SeqCst),
        }
    }
}

struct Entry<T> {
    value: T,
    stale: bool,
}

/// Keyed storage for one kind of query result.
pub struct QuerySlot<T> {
    name: &'static str,
    enabled: bool,
    epochs: Arc<Epochs>,
    entries: RwLock<LruCache<QueryKey, Entry<T>>>,
    // One gate per key with a fetch in progress; waiters re-check the entry
    // after the leader finishes.
    in_flight: DashMap<QueryKey, Arc<AsyncMutex<()>>>,
}

impl<T: Clone> QuerySlot<T> {
    fn new(name: &'static str, limit: usize, enabled: bool, epochs: Arc<Epochs>) -> Self {
        Self {
            name,
            enabled,
            epochs,
            entries: RwLock::new(LruCache::new(non_zero(limit))),
            in_flight: DashMap::new(),
        }
    }

    /// Cached value for rendering, stale or not.
    pub fn peek(&self, key: &QueryKey) -> Option<T> {
        recover(self.entries.read(), self.name, "peek")
            .peek(key)
            .map(|entry| entry.value.clone())
    }

    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        recover(self.entries.read(), self.name, "is_fresh")
            .peek(key)
            .is_some_and(|entry| !entry.stale)
    }

    pub fn len(&self) -> usize {
        recover(self.entries.read(), self.name, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn peek_fresh(&self, key: &QueryKey) -> Option<T> {
        recover(self.entries.read(), self.name, "peek_fresh")
            .peek(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.value.clone())
    }

    fn fresh(&self, key: &QueryKey) -> Option<T> {
        recover(self.entries.write(), self.name, "fresh")
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.value.clone())
    }

    /// Return the fresh value for `key`, fetching it when it is absent or
    /// stale. Concurrent callers for the same key share one fetch.
    ///
    /// `fetch` receives the stale value, if any, so paged queries can refetch
    /// as many pages as were held.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &QueryKey, fetch: F) -> Result<T, E>
    where
        F: FnOnce(Option<T>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return fetch(None).await;
        }

        if let Some(value) = self.fresh(key) {
            counter!("chorus_query_cache_hit_total", "slot" => self.name).increment(1);
            return Ok(value);
        }

        let gate = self.gate(key);
        let guard = gate.lock().await;

        if let Some(value) = self.fresh(key) {
            drop(guard);
            self.release(key, gate);
            counter!("chorus_query_cache_hit_total", "slot" => self.name).increment(1);
            debug!(slot = self.name, family = key.family(), "Joined in-flight fetch");
            return Ok(value);
        }

        counter!("chorus_query_cache_miss_total", "slot" => self.name).increment(1);
        let started = self.epochs.current();
        let result = fetch(self.peek(key)).await;
        if let Ok(value) = &result {
            self.store(key, value.clone(), started);
        }

        drop(guard);
        self.release(key, gate);
        result
    }

    /// Compute a new value for `key` from its current fresh one, serialized
    /// with fetches of the same key.
    ///
    /// `update` receives `None` when the entry is stale or gone by the time
    /// the key's gate is taken, so it never builds on data that an
    /// invalidation or reset has already retired.
    pub async fn update<F, Fut, E>(&self, key: &QueryKey, update: F) -> Result<T, E>
    where
        F: FnOnce(Option<T>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return update(None).await;
        }

        let gate = self.gate(key);
        let guard = gate.lock().await;

        let started = self.epochs.current();
        let result = update(self.peek_fresh(key)).await;
        if let Ok(value) = &result {
            self.store(key, value.clone(), started);
        }

        drop(guard);
        self.release(key, gate);
        result
    }

    /// Write a fetch result that started at `started`.
    ///
    /// Dropped when the cache was reset since then; stored stale when an
    /// invalidation happened since then. Returns whether anything was stored.
    pub fn store(&self, key: &QueryKey, value: T, started: CacheEpoch) -> bool {
        if !self.enabled {
            return false;
        }

        let mut entries = recover(self.entries.write(), self.name, "store");
        let now = self.epochs.current();
        if now.reset != started.reset {
            debug!(
                slot = self.name,
                family = key.family(),
                "Discarded fetch result that predates a cache reset"
            );
            return false;
        }

        let stale = now.invalidation != started.invalidation;
        if let Some((evicted, _)) = entries.push(key.clone(), Entry { value, stale })
            && evicted != *key
        {
            counter!("chorus_query_cache_evict_total", "slot" => self.name).increment(1);
        }
        true
    }

    fn invalidate(&self, filter: &QueryFilter) -> usize {
        let mut entries = recover(self.entries.write(), self.name, "invalidate");
        let mut marked = 0;
        for (key, entry) in entries.iter_mut() {
            if !entry.stale && filter.matches(key) {
                entry.stale = true;
                marked += 1;
            }
        }
        marked
    }

    fn clear(&self) {
        recover(self.entries.write(), self.name, "clear").clear();
    }

    fn gate(&self, key: &QueryKey) -> Arc<AsyncMutex<()>> {
        self.in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone()
    }

    fn release(&self, key: &QueryKey, gate: Arc<AsyncMutex<()>>) {
        drop(gate);
        self.in_flight
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

/// Query cache shared by the services of one signed-in session.
pub struct QueryCache {
    config: CacheConfig,
    epochs: Arc<Epochs>,
    posts: QuerySlot<Option<PostRecord>>,
    feeds: QuerySlot<FeedPages<PostRecord>>,
    profiles: QuerySlot<Option<ProfileRecord>>,
    relations: QuerySlot<Vec<ProfileRecord>>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let epochs = Arc::new(Epochs::default());
        let enabled = config.enabled;
        Self {
            posts: QuerySlot::new("post", config.post_limit, enabled, epochs.clone()),
            feeds: QuerySlot::new("feed", config.feed_limit, enabled, epochs.clone()),
            profiles: QuerySlot::new("profile", config.profile_limit, enabled, epochs.clone()),
            relations: QuerySlot::new("relation", config.relation_limit, enabled, epochs.clone()),
            epochs,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Post detail entries, keyed by `QueryKey::Post`. `None` means the
    /// backend has no such post.
    pub fn posts(&self) -> &QuerySlot<Option<PostRecord>> {
        &self.posts
    }

    /// Paged feeds, keyed by `QueryKey::Posts`.
    pub fn feeds(&self) -> &QuerySlot<FeedPages<PostRecord>> {
        &self.feeds
    }

    /// Profile summaries, keyed by `QueryKey::Profile`.
    pub fn profiles(&self) -> &QuerySlot<Option<ProfileRecord>> {
        &self.profiles
    }

    /// Follower and following lists.
    pub fn relations(&self) -> &QuerySlot<Vec<ProfileRecord>> {
        &self.relations
    }

    pub fn epoch(&self) -> CacheEpoch {
        self.epochs.current()
    }

    /// Mark every matching entry stale. The next read of any of them waits
    /// for a fresh fetch; `peek` still returns the old value.
    pub fn invalidate(&self, filter: &QueryFilter) -> usize {
        self.epochs.invalidation.fetch_add(1, Ordering::SeqCst);
        let marked = self.posts.invalidate(filter)
            + self.feeds.invalidate(filter)
            + self.profiles.invalidate(filter)
            + self.relations.invalidate(filter);

        counter!("chorus_query_cache_invalidated_total").increment(marked as u64);
        debug!(filter = ?filter, marked, "Query cache entries invalidated");
        marked
    }

    /// Drop every entry. Fetches already in flight will not repopulate the
    /// cache when they complete.
    pub fn reset(&self) {
        self.epochs.reset.fetch_add(1, Ordering::SeqCst);
        self.posts.clear();
        self.feeds.clear();
        self.profiles.clear();
        self.relations.clear();

        counter!("chorus_query_cache_reset_total").increment(1);
        info!("Query cache reset");
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
