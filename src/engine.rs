//! One publishing run: keyword → cached or fetched candidates → dedup →
//! best discount → publish → record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{SearchCache, SCOPE_ALL};
use crate::error::FetchError;
use crate::keywords::KeywordSelector;
use crate::model::{CandidateItem, FilterSpec, SourceSettings};
use crate::publish::{ErrorNotifier, Publisher};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{PublishedStore, SettingsStore};

/// What the engine needs from the source side.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Install a new settings snapshot; `true` if it changed.
    async fn apply_settings(&self, settings: Vec<SourceSettings>) -> bool;

    async fn fetch_all(&self, keyword: &str, total: usize)
        -> Result<Vec<CandidateItem>, FetchError>;

    fn overfetch(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run was in progress.
    Skipped,
    NoSources,
    NoKeyword,
    FetchFailed,
    NoCandidates,
    AllPublished,
    Published {
        source_id: String,
        external_id: String,
        discount_percent: u8,
    },
    PublishFailed {
        source_id: String,
        external_id: String,
    },
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub products_per_run: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            products_per_run: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// Collaborators wired into a [`DealEngine`].
pub struct EngineDeps {
    pub sources: Arc<dyn CandidateSource>,
    pub cache: Arc<SearchCache>,
    pub keywords: KeywordSelector,
    pub settings: Arc<dyn SettingsStore>,
    pub published: Arc<dyn PublishedStore>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn ErrorNotifier>,
}

pub struct DealEngine {
    deps: EngineDeps,
    opts: EngineOptions,
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Highest discount wins; on a tie the earlier candidate is kept.
pub fn select_best(candidates: &[CandidateItem]) -> Option<&CandidateItem> {
    candidates.iter().fold(None, |best, c| match best {
        Some(b) if c.discount_percent <= b.discount_percent => Some(b),
        _ => Some(c),
    })
}

impl DealEngine {
    pub fn new(deps: EngineDeps, opts: EngineOptions) -> Self {
        Self {
            deps,
            opts,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fire-and-forget run. The handle only matters to callers that want the
    /// outcome (tests, the one-shot binary).
    pub fn trigger_run(self: &Arc<Self>) -> JoinHandle<RunOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_once().await })
    }

    /// Execute one run unless another is in flight, in which case the call
    /// returns [`RunOutcome::Skipped`] immediately.
    #[instrument(skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run_once(&self) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("run already in progress; skipping");
            return RunOutcome::Skipped;
        }
        let _guard = RunGuard(&self.running);

        info!("run started");
        let outcome = match self.run_inner().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(?err, "run failed");
                self.deps.notifier.notify(&format!("Deal run failed: {err:#}")).await;
                RunOutcome::Failed(format!("{err:#}"))
            }
        };
        info!(?outcome, "run finished");
        outcome
    }

    async fn run_inner(&self) -> Result<RunOutcome> {
        let settings = self
            .deps
            .settings
            .list_enabled_sources()
            .await
            .context("failed to load source settings")?;
        if settings.is_empty() {
            warn!("no enabled sources");
            return Ok(RunOutcome::NoSources);
        }
        let filters = self.cache_filters(&settings);
        self.deps.sources.apply_settings(settings).await;

        let keyword = self.deps.keywords.select_next().await;
        if keyword.trim().is_empty() {
            error!("selected keyword is empty; aborting run");
            return Ok(RunOutcome::NoKeyword);
        }
        info!(keyword = %keyword, "searching");

        let candidates = match self.deps.cache.get(SCOPE_ALL, &keyword, &filters) {
            Some(items) if !items.is_empty() => {
                info!(count = items.len(), "cache hit");
                items
            }
            _ => {
                let total = self.opts.products_per_run * self.deps.sources.overfetch();
                let fetched = retry_with_backoff(self.opts.retry, || {
                    self.deps.sources.fetch_all(&keyword, total)
                })
                .await;
                match fetched {
                    Ok(items) => {
                        if !items.is_empty() {
                            self.deps
                                .cache
                                .set(SCOPE_ALL, &keyword, items.clone(), &filters, None);
                        }
                        items
                    }
                    Err(err) => {
                        warn!(error = %err, "fetch failed after retries");
                        return Ok(RunOutcome::FetchFailed);
                    }
                }
            }
        };

        if candidates.is_empty() {
            info!("no candidates found");
            return Ok(RunOutcome::NoCandidates);
        }

        let fresh = self.unpublished(candidates).await;
        let Some(best) = select_best(&fresh) else {
            info!("every candidate was already published");
            return Ok(RunOutcome::AllPublished);
        };
        info!(
            source = %best.source_id,
            id = %best.external_id,
            discount = best.discount_percent,
            pool = fresh.len(),
            "candidate selected"
        );

        if let Err(err) = self.deps.publisher.publish(best).await {
            error!(?err, source = %best.source_id, id = %best.external_id, "publish failed");
            self.deps
                .notifier
                .notify(&format!(
                    "Failed to publish {}/{}: {err:#}",
                    best.source_id, best.external_id
                ))
                .await;
            return Ok(RunOutcome::PublishFailed {
                source_id: best.source_id.clone(),
                external_id: best.external_id.clone(),
            });
        }

        if let Err(err) = self.deps.published.mark_published(best).await {
            warn!(
                ?err,
                source = %best.source_id,
                id = %best.external_id,
                "failed to record publication"
            );
        }

        Ok(RunOutcome::Published {
            source_id: best.source_id.clone(),
            external_id: best.external_id.clone(),
            discount_percent: best.discount_percent,
        })
    }

    /// Filters that key the aggregate cache entry for this run.
    fn cache_filters(&self, settings: &[SourceSettings]) -> FilterSpec {
        let primary = settings
            .iter()
            .min_by_key(|s| s.priority)
            .map(|s| s.min_discount);
        FilterSpec {
            min_discount: primary,
            max_results: Some(self.opts.products_per_run * self.deps.sources.overfetch()),
            in_stock_only: Some(true),
            ..Default::default()
        }
    }

    /// Drop candidates the store reports as published. A failing lookup keeps
    /// the candidate, accepting a possible duplicate post.
    async fn unpublished(&self, candidates: Vec<CandidateItem>) -> Vec<CandidateItem> {
        let checks = futures::future::join_all(candidates.iter().map(|c| {
            self.deps
                .published
                .is_published(&c.external_id, &c.source_id)
        }))
        .await;

        candidates
            .into_iter()
            .zip(checks)
            .filter_map(|(c, check)| match check {
                Ok(true) => {
                    debug!(source = %c.source_id, id = %c.external_id, "already published");
                    None
                }
                Ok(false) => Some(c),
                Err(err) => {
                    warn!(
                        ?err,
                        source = %c.source_id,
                        id = %c.external_id,
                        "publication check failed; keeping candidate"
                    );
                    Some(c)
                }
            })
            .collect()
    }
}
