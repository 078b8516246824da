//! Source registry: owns adapters and settings, allocates the per-source
//! quota and fans fetches out concurrently.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::SearchCache;
use crate::engine::CandidateSource;
use crate::error::FetchError;
use crate::model::{CandidateItem, SourceSettings};
use crate::source::SourceAdapter;

/// Each source is asked for this many times its raw allocation.
pub const DEFAULT_OVERFETCH: usize = 5;

/// Priority reported for a registered source that has no settings yet.
pub const UNSET_PRIORITY: i32 = 999;

/// One allocation slot: `(source id, weight, priority)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSlot {
    pub source_id: String,
    pub weight: f64,
    pub priority: i32,
}

/// Split `total` across `slots` proportionally to their weights.
///
/// Slots are processed in priority order (lowest value first, ties by id).
/// Counts are rounded half away from zero and the rounding residual is
/// charged to the highest-priority slot; if clamping at zero leaves some
/// residual, it moves on to the next slot so the counts always sum to
/// `total`. With no positive weight the split is as even as possible, the
/// remainder going to the highest-priority slots.
pub fn allocate(slots: &[AllocationSlot], total: usize) -> Vec<(String, usize)> {
    let mut ordered: Vec<&AllocationSlot> = slots.iter().collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    if ordered.is_empty() {
        return Vec::new();
    }

    let weight = |s: &AllocationSlot| {
        if s.weight.is_finite() && s.weight > 0.0 {
            s.weight
        } else {
            0.0
        }
    };
    let sum_w: f64 = ordered.iter().map(|s| weight(*s)).sum();
    let n = ordered.len();

    let mut counts: Vec<i64> = if sum_w <= 0.0 {
        let base = (total / n) as i64;
        let extra = total % n;
        (0..n).map(|i| base + i64::from(i < extra)).collect()
    } else {
        ordered
            .iter()
            .map(|s| (total as f64 * weight(*s) / sum_w).round() as i64)
            .collect()
    };

    let mut residual = total as i64 - counts.iter().sum::<i64>();
    for c in counts.iter_mut() {
        if residual == 0 {
            break;
        }
        let next = (*c + residual).max(0);
        residual -= next - *c;
        *c = next;
    }

    ordered
        .iter()
        .zip(counts)
        .map(|(s, c)| (s.source_id.clone(), c.max(0) as usize))
        .collect()
}

/// Per-source view for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub enabled: bool,
    pub ready: bool,
    pub priority: i32,
    pub weight: f64,
}

/// Registry overview. A registered source missing from the current settings
/// snapshot reports as disabled with priority [`UNSET_PRIORITY`] and weight 0;
/// the engine installs only enabled settings, so feed the full list (as the
/// `sources` binary does) to see configured values for disabled sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub source_count: usize,
    pub enabled_count: usize,
    pub disabled_count: usize,
    pub per_source: BTreeMap<String, SourceStats>,
}

pub struct SourceRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn SourceAdapter>>>,
    settings: RwLock<BTreeMap<String, SourceSettings>>,
    cache: Arc<SearchCache>,
    overfetch: usize,
}

impl SourceRegistry {
    pub fn new(cache: Arc<SearchCache>) -> Self {
        Self::with_overfetch(cache, DEFAULT_OVERFETCH)
    }

    pub fn with_overfetch(cache: Arc<SearchCache>, overfetch: usize) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            settings: RwLock::new(BTreeMap::new()),
            cache,
            overfetch: overfetch.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    /// Register (or replace) the adapter for its id.
    pub async fn register_source(&self, adapter: Arc<dyn SourceAdapter>) {
        let id = adapter.id().to_string();
        let replaced = self.adapters.write().await.insert(id.clone(), adapter).is_some();
        info!(source = %id, replaced, "source registered");
    }

    /// Initialize every adapter concurrently; returns how many are ready.
    pub async fn initialize(&self) -> usize {
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            self.adapters.read().await.values().cloned().collect();
        let results = futures::future::join_all(adapters.iter().map(|a| a.initialize())).await;
        let mut ready = 0;
        for (adapter, res) in adapters.iter().zip(results) {
            match res {
                Ok(()) => ready += 1,
                Err(err) => warn!(source = %adapter.id(), ?err, "source failed to initialize"),
            }
        }
        info!(ready, total = adapters.len(), "sources initialized");
        ready
    }

    /// Replace the settings snapshot. Returns `true` when it differed from
    /// the previous one, in which case the cache has been invalidated first.
    pub async fn update_settings(&self, settings: Vec<SourceSettings>) -> bool {
        let next: BTreeMap<String, SourceSettings> = settings
            .into_iter()
            .map(|s| (s.source_id.clone(), s))
            .collect();
        let mut current = self.settings.write().await;
        if *current == next {
            debug!(sources = next.len(), "source settings unchanged");
            return false;
        }
        self.cache.invalidate_all();
        info!(sources = next.len(), "source settings updated");
        *current = next;
        true
    }

    pub async fn settings(&self) -> Vec<SourceSettings> {
        self.settings.read().await.values().cloned().collect()
    }

    /// Registered sources whose settings enable them, by priority.
    pub async fn enabled_sources(&self) -> Vec<SourceSettings> {
        let adapters = self.adapters.read().await;
        let mut out: Vec<SourceSettings> = self
            .settings
            .read()
            .await
            .values()
            .filter(|s| s.enabled && adapters.contains_key(&s.source_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        out
    }

    pub async fn allocation(&self, total: usize) -> Vec<(String, usize)> {
        let slots: Vec<AllocationSlot> = self
            .enabled_sources()
            .await
            .into_iter()
            .map(|s| AllocationSlot {
                source_id: s.source_id,
                weight: s.posting_weight,
                priority: s.priority,
            })
            .collect();
        allocate(&slots, total)
    }

    /// Fetch `total` items (before over-fetching) across all enabled sources.
    ///
    /// Sources run concurrently; an adapter that panics is logged and
    /// counted, never propagated. Results come back in completion order with
    /// duplicate `(source, id)` pairs removed.
    pub async fn fetch_all(
        &self,
        keyword: &str,
        total: usize,
    ) -> Result<Vec<CandidateItem>, FetchError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            error!("fetch requested with an empty keyword");
            return Err(FetchError::InvalidKeyword);
        }

        let plan = self.allocation(total).await;
        if plan.is_empty() {
            warn!("no enabled sources");
            return Ok(Vec::new());
        }

        let adapters = self.adapters.read().await.clone();
        let settings = self.settings.read().await.clone();
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        for (id, count) in plan {
            if count == 0 {
                continue;
            }
            let (Some(adapter), Some(cfg)) = (adapters.get(&id), settings.get(&id)) else {
                continue;
            };
            if !adapter.is_ready() {
                warn!(source = %id, "source not ready; skipping");
                continue;
            }
            let adapter = Arc::clone(adapter);
            let filters = cfg.filter_spec(count * self.overfetch);
            let kw = keyword.to_string();
            dispatched += 1;
            debug!(
                source = %id,
                allocated = count,
                requested = count * self.overfetch,
                "dispatching fetch"
            );
            tasks.spawn(async move {
                let res = AssertUnwindSafe(adapter.search_candidates(&kw, &filters))
                    .catch_unwind()
                    .await;
                (id, res)
            });
        }

        let mut items = Vec::new();
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(found))) => {
                    info!(source = %id, count = found.len(), keyword, "source fetch complete");
                    items.extend(found);
                }
                Ok((id, Err(_panic))) => {
                    failed += 1;
                    error!(source = %id, keyword, "source fetch panicked");
                }
                Err(err) => {
                    failed += 1;
                    error!(?err, keyword, "source fetch task failed");
                }
            }
        }

        if dispatched > 0 && failed == dispatched {
            return Err(FetchError::AllSourcesFailed {
                attempted: dispatched,
            });
        }

        let mut seen = HashSet::new();
        items.retain(|it| seen.insert((it.source_id.clone(), it.external_id.clone())));
        info!(keyword, total = items.len(), dispatched, failed, "aggregate fetch complete");
        Ok(items)
    }

    /// Fetch from one source using its own settings (defaults when unset).
    pub async fn fetch_from_source(
        &self,
        source_id: &str,
        keyword: &str,
        max_results: usize,
    ) -> Result<Vec<CandidateItem>, FetchError> {
        let adapter = self
            .adapters
            .read()
            .await
            .get(source_id)
            .cloned()
            .ok_or_else(|| FetchError::UnknownSource(source_id.to_string()))?;
        if !adapter.is_ready() {
            return Err(FetchError::SourceNotReady(source_id.to_string()));
        }
        let filters = self
            .settings
            .read()
            .await
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| SourceSettings::new(source_id))
            .filter_spec(max_results);
        Ok(adapter.search_candidates(keyword, &filters).await)
    }

    pub async fn stats(&self) -> RegistryStats {
        let adapters = self.adapters.read().await;
        let settings = self.settings.read().await;
        let per_source: BTreeMap<String, SourceStats> = adapters
            .iter()
            .map(|(id, adapter)| {
                let s = settings.get(id);
                (
                    id.clone(),
                    SourceStats {
                        enabled: s.is_some_and(|s| s.enabled),
                        ready: adapter.is_ready(),
                        priority: s.map_or(UNSET_PRIORITY, |s| s.priority),
                        weight: s.map_or(0.0, |s| s.posting_weight),
                    },
                )
            })
            .collect();
        let enabled_count = per_source.values().filter(|s| s.enabled).count();
        RegistryStats {
            source_count: per_source.len(),
            enabled_count,
            disabled_count: per_source.len() - enabled_count,
            per_source,
        }
    }
}

#[async_trait]
impl CandidateSource for SourceRegistry {
    async fn apply_settings(&self, settings: Vec<SourceSettings>) -> bool {
        self.update_settings(settings).await
    }

    async fn fetch_all(
        &self,
        keyword: &str,
        total: usize,
    ) -> Result<Vec<CandidateItem>, FetchError> {
        SourceRegistry::fetch_all(self, keyword, total).await
    }

    fn overfetch(&self) -> usize {
        self.overfetch
    }
}
