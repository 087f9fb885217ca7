//! kbrowse store: search response cache with expiry and a FIFO size bound.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kbrowse_core::{CacheConfig, ListPage, Row, SearchQuery};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

/// One cached search result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: SearchQuery,
    pub results: Vec<Row>,
    pub total: u64,
    pub timestamp: Instant,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.timestamp) < ttl
    }

    pub fn to_page(&self) -> ListPage {
        ListPage::new(self.results.clone(), self.total)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
}

/// Cache keyed by `(term, namespace)`.
///
/// Entries older than `ttl` are treated as absent and dropped on lookup. When
/// full, the oldest-inserted key is evicted (insertion order, not access
/// order). Overwriting a key keeps its original insertion slot.
pub struct ResponseCache {
    map: FxHashMap<SearchQuery, CacheEntry>,
    order: VecDeque<SearchQuery>,
    ttl: Duration,
    cap: usize,
    stats: CacheStats,
}

impl ResponseCache {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), ttl, cap: cap.max(1), stats: CacheStats::default() }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.ttl, cfg.max_entries)
    }

    pub fn ttl(&self) -> Duration { self.ttl }
    pub fn capacity(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn stats(&self) -> CacheStats { self.stats }

    pub fn get(&mut self, query: &SearchQuery) -> Option<CacheEntry> {
        self.get_at(query, Instant::now())
    }

    pub fn get_at(&mut self, query: &SearchQuery, now: Instant) -> Option<CacheEntry> {
        let fresh = match self.map.get(query) {
            None => {
                self.stats.misses += 1;
                counter!("kbrowse_cache_misses_total", 1u64);
                return None;
            }
            Some(entry) => entry.is_fresh_at(now, self.ttl),
        };
        if !fresh {
            self.remove(query);
            self.stats.expired += 1;
            self.stats.misses += 1;
            counter!("kbrowse_cache_misses_total", 1u64);
            debug!(key = %query.cache_key(), "cache: expired entry dropped");
            return None;
        }
        self.stats.hits += 1;
        counter!("kbrowse_cache_hits_total", 1u64);
        debug!(key = %query.cache_key(), "cache: hit");
        self.map.get(query).cloned()
    }

    pub fn put(&mut self, query: SearchQuery, results: Vec<Row>, total: u64) {
        self.put_at(query, results, total, Instant::now());
    }

    pub fn put_at(&mut self, query: SearchQuery, results: Vec<Row>, total: u64, now: Instant) {
        if !self.map.contains_key(&query) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.stats.evicted += 1;
                    counter!("kbrowse_cache_evictions_total", 1u64);
                    debug!(key = %old.cache_key(), "cache: evicted oldest");
                }
            }
            self.order.push_back(query.clone());
        }
        let entry = CacheEntry { key: query.clone(), results, total, timestamp: now };
        self.map.insert(query, entry);
    }

    pub fn remove(&mut self, query: &SearchQuery) -> Option<CacheEntry> {
        let removed = self.map.remove(query);
        if removed.is_some() {
            self.order.retain(|k| k != query);
        }
        removed
    }

    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.map.len();
        self.map.retain(|_, e| e.is_fresh_at(now, ttl));
        let map = &self.map;
        self.order.retain(|k| map.contains_key(k));
        let removed = before - self.map.len();
        self.stats.expired += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Keys in eviction order (oldest first).
    pub fn keys(&self) -> impl Iterator<Item = &SearchQuery> {
        self.order.iter()
    }
}

/// Cloneable handle to one cache, shared by every table hitting the same endpoint.
#[derive(Clone)]
pub struct SharedCache {
    inner: Arc<Mutex<ResponseCache>>,
}

impl SharedCache {
    pub fn new(cache: ResponseCache) -> Self {
        Self { inner: Arc::new(Mutex::new(cache)) }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(ResponseCache::from_config(cfg))
    }

    fn lock(&self) -> MutexGuard<'_, ResponseCache> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, query: &SearchQuery) -> Option<CacheEntry> {
        self.lock().get(query)
    }

    pub fn put(&self, query: SearchQuery, page: &ListPage) {
        self.lock().put(query, page.rows.clone(), page.total);
    }

    pub fn clear(&self) {
        self.lock().clear();
        info!("cache: cleared");
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }
    pub fn stats(&self) -> CacheStats { self.lock().stats() }

    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired()
    }

    /// Periodically purge expired entries until the returned handle is stopped or dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        let cache = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "cache: sweeper purged expired entries");
                        }
                    }
                }
            }
            debug!("cache: sweeper stopped");
        });
        SweeperHandle { stop: Some(stop_tx), task: Some(task) }
    }
}

/// Stops the background sweeper on [`SweeperHandle::stop`] or drop.
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
