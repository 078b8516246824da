//! Source adapter contract and the concrete adapters.
//!
//! An adapter fetches raw offers for one keyword, normalizes them into
//! [`CandidateItem`]s and runs them through the shared filter pipeline.
//! Transport and parse failures stay inside the adapter: callers only ever
//! see a (possibly empty) list.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::filter::{apply_filters, normalize_keyword};
use crate::model::{CandidateItem, FilterSpec};

pub mod api;
pub mod scraper;

pub use api::ApiAdapter;
pub use scraper::ScraperAdapter;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier, matching `SourceSettings::source_id`.
    fn id(&self) -> &str;

    /// One-time setup. An adapter that fails here stays not-ready.
    async fn initialize(&self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Raw fetch and normalization for an already-normalized keyword.
    /// Filtering is applied by [`SourceAdapter::search_candidates`].
    async fn fetch_raw(&self, keyword: &str, filters: &FilterSpec) -> Result<Vec<CandidateItem>>;

    fn generate_affiliate_link(&self, item: &CandidateItem) -> String;

    async fn check_availability(&self, item: &CandidateItem) -> Result<bool> {
        Ok(item.in_stock)
    }

    /// Normalize the keyword, fetch, filter. Never fails: any error is logged
    /// and yields an empty list.
    async fn search_candidates(&self, keyword: &str, filters: &FilterSpec) -> Vec<CandidateItem> {
        if keyword.trim().is_empty() {
            warn!(source = %self.id(), "empty keyword; using default");
        }
        let keyword = normalize_keyword(keyword);
        match self.fetch_raw(&keyword, filters).await {
            Ok(raw) => {
                let fetched = raw.len();
                let items = apply_filters(raw, filters);
                info!(
                    source = %self.id(),
                    keyword = %keyword,
                    fetched,
                    kept = items.len(),
                    "source search finished"
                );
                items
            }
            Err(err) => {
                warn!(source = %self.id(), keyword = %keyword, ?err, "source search failed");
                Vec::new()
            }
        }
    }
}
