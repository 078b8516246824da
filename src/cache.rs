//! In-memory TTL + LRU cache for aggregated search results.
//!
//! Entries are keyed by a fingerprint of `(scope, keyword, canonical filters)`.
//! The cache is process-local; running several processes would need a shared
//! store instead.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::filter::DEFAULT_KEYWORD;
use crate::model::{CandidateItem, FilterSpec};

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Scope used for results aggregated over every enabled source.
pub const SCOPE_ALL: &str = "all";

/// Deterministic cache key for a search.
///
/// The keyword is trimmed and lowercased (empty becomes the default keyword)
/// and the filters are canonicalized before hashing, so equivalent requests
/// share a key while any differing filter field yields a new one.
pub fn derive_fingerprint(scope: &str, keyword: &str, filters: &FilterSpec) -> String {
    let kw = normalize_cache_keyword(keyword);
    let canonical = serde_json::to_vec(&filters.canonical()).unwrap_or_default();
    let digest = hex::encode(Sha256::digest(&canonical));
    format!("{scope}:{kw}:{digest}")
}

fn normalize_cache_keyword(keyword: &str) -> String {
    let kw = keyword.trim().to_lowercase();
    if kw.is_empty() {
        DEFAULT_KEYWORD.to_string()
    } else {
        kw
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub scope: String,
    pub keyword: String,
    pub payload: Vec<CandidateItem>,
    pub cached_at: Instant,
    pub expires_at: Instant,
    pub last_accessed: Instant,
    // Monotonic access order; breaks ties between identical instants.
    access_seq: u64,
}

/// Counters and sizing exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub default_ttl_secs: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    sets: u64,
    evictions: u64,
    seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed, e.access_seq))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "cache evicted (lru)");
        }
    }
}

pub struct SearchCache {
    state: Mutex<State>,
    default_ttl: Duration,
    max_entries: usize,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl std::fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCache")
            .field("default_ttl", &self.default_ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl SearchCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            default_ttl,
            max_entries: max_entries.max(1),
            sweeper: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Cached items for the request, or `None` on a miss. An expired entry is
    /// dropped and counted as both a miss and an eviction.
    pub fn get(
        &self,
        scope: &str,
        keyword: &str,
        filters: &FilterSpec,
    ) -> Option<Vec<CandidateItem>> {
        let key = derive_fingerprint(scope, keyword, filters);
        let now = Instant::now();
        let mut st = self.state();

        let expired = match st.entries.get(&key) {
            None => {
                st.misses += 1;
                debug!(key = %key, "cache miss");
                return None;
            }
            Some(entry) => now > entry.expires_at,
        };

        if expired {
            st.entries.remove(&key);
            st.misses += 1;
            st.evictions += 1;
            debug!(key = %key, "cache entry expired");
            return None;
        }

        let seq = st.next_seq();
        st.hits += 1;
        let entry = st.entries.get_mut(&key)?;
        entry.last_accessed = now;
        entry.access_seq = seq;
        debug!(key = %key, items = entry.payload.len(), "cache hit");
        Some(entry.payload.clone())
    }

    /// Store `items` under the request's fingerprint. When full, the least
    /// recently accessed entry makes room for a new key.
    pub fn set(
        &self,
        scope: &str,
        keyword: &str,
        items: Vec<CandidateItem>,
        filters: &FilterSpec,
        ttl: Option<Duration>,
    ) {
        let key = derive_fingerprint(scope, keyword, filters);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();
        let mut st = self.state();

        if !st.entries.contains_key(&key) && st.entries.len() >= self.max_entries {
            st.evict_lru();
        }

        let seq = st.next_seq();
        debug!(key = %key, items = items.len(), ttl_ms = ttl.as_millis() as u64, "cache set");
        st.entries.insert(
            key.clone(),
            CacheEntry {
                fingerprint: key,
                scope: scope.to_string(),
                keyword: keyword.to_string(),
                payload: items,
                cached_at: now,
                expires_at: now + ttl,
                last_accessed: now,
                access_seq: seq,
            },
        );
        st.sets += 1;
    }

    /// Drop every TTL-expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut st = self.state();
        let before = st.entries.len();
        st.entries.retain(|_, e| now <= e.expires_at);
        let removed = before - st.entries.len();
        if removed > 0 {
            st.evictions += removed as u64;
            debug!(removed, "cache sweep");
        }
        removed
    }

    /// Clear everything. Called whenever source settings change so results
    /// filtered under the old configuration cannot be served.
    pub fn invalidate_all(&self) {
        let mut st = self.state();
        let size = st.entries.len();
        st.entries.clear();
        info!(size, "cache invalidated after settings change");
    }

    /// Drop entries whose key, keyword or scope contains `pattern`.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut st = self.state();
        let before = st.entries.len();
        st.entries.retain(|key, e| {
            !(key.contains(pattern) || e.keyword.contains(pattern) || e.scope == pattern)
        });
        let removed = before - st.entries.len();
        info!(pattern, removed, "cache entries invalidated");
        removed
    }

    pub fn clear(&self) {
        let mut st = self.state();
        let size = st.entries.len();
        st.entries.clear();
        info!(size, "cache cleared");
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct keywords currently cached.
    pub fn cached_keywords(&self) -> Vec<String> {
        let st = self.state();
        let mut kws: Vec<String> = st.entries.values().map(|e| e.keyword.clone()).collect();
        kws.sort();
        kws.dedup();
        kws
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state();
        let lookups = st.hits + st.misses;
        let hit_rate = if lookups > 0 {
            st.hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            size: st.entries.len(),
            max_size: self.max_entries,
            hits: st.hits,
            misses: st.misses,
            sets: st.sets,
            evictions: st.evictions,
            hit_rate,
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }

    /// Start the background task that sweeps expired entries every `every`.
    /// A second call replaces the running sweeper.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let token = CancellationToken::new();
        let cache = Arc::clone(self);
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
            debug!("cache sweeper stopped");
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .replace((token, handle));
        if let Some((old, _)) = previous {
            old.cancel();
        }
    }

    /// Stop the sweeper and drop all entries.
    pub fn close(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some((token, _handle)) = sweeper {
            token.cancel();
        }
        self.clear();
        info!("cache closed");
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}
