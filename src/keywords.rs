use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::filter::DEFAULT_KEYWORD;
use crate::store::KeywordStore;

pub const FALLBACK_KEYWORDS: [&str; 20] = [
    "electronics deals",
    "fashion sale",
    "home appliances discount",
    "books offer",
    "beauty products sale",
    "mobile phones",
    "laptops",
    "clothing",
    "shoes",
    "watches",
    "headphones",
    "smartwatch",
    "camera",
    "tablet",
    "gaming",
    "fitness",
    "kitchen appliances",
    "furniture",
    "toys",
    "sports equipment",
];

/// Picks the next search term: least-used entry of the keyword pool, or a
/// round-robin over a static list when the pool is empty or unreadable.
pub struct KeywordSelector {
    store: Arc<dyn KeywordStore>,
    fallback: Vec<String>,
    cursor: AtomicUsize,
}

impl KeywordSelector {
    pub fn new(store: Arc<dyn KeywordStore>) -> Self {
        Self::with_fallback(store, FALLBACK_KEYWORDS.iter().map(|s| s.to_string()).collect())
    }

    /// Blank fallback entries are dropped; an empty list becomes the default
    /// keyword so selection never comes back empty.
    pub fn with_fallback(store: Arc<dyn KeywordStore>, fallback: Vec<String>) -> Self {
        let mut fallback: Vec<String> = fallback
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if fallback.is_empty() {
            fallback.push(DEFAULT_KEYWORD.to_string());
        }
        Self {
            store,
            fallback,
            cursor: AtomicUsize::new(0),
        }
    }

    pub async fn select_next(&self) -> String {
        match self.store.list_keywords().await {
            Ok(pool) => {
                let pick = pool
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| !k.term.trim().is_empty())
                    .min_by_key(|(i, k)| (k.usage_count, *i))
                    .map(|(_, k)| k);
                if let Some(entry) = pick {
                    if let Err(err) = self.store.increment_usage(entry.id).await {
                        warn!(?err, keyword_id = entry.id, "failed to bump keyword usage");
                    }
                    info!(
                        keyword = %entry.term.trim(),
                        usage = entry.usage_count,
                        "keyword selected from pool"
                    );
                    return entry.term.trim().to_string();
                }
                debug!("keyword pool empty; using fallback list");
            }
            Err(err) => warn!(?err, "failed to read keyword pool; using fallback list"),
        }
        self.next_fallback()
    }

    fn next_fallback(&self) -> String {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.fallback.len();
        let kw = self.fallback[idx].clone();
        info!(keyword = %kw, index = idx, "fallback keyword selected");
        kw
    }
}
