use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tg_dealbot::cache::SearchCache;
use tg_dealbot::db::{self, Pool, SqliteStore};
use tg_dealbot::engine::{DealEngine, EngineDeps, EngineOptions, RunOutcome};
use tg_dealbot::keywords::KeywordSelector;
use tg_dealbot::model::{CandidateItem, FilterSpec, SourceSettings};
use tg_dealbot::publish::{LogNotifier, Publisher};
use tg_dealbot::registry::SourceRegistry;
use tg_dealbot::source::SourceAdapter;
use tg_dealbot::store::{KeywordStore, PublishedStore, SettingsStore};
use tokio::sync::Mutex;

async fn memory_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

struct StaticAdapter {
    id: String,
    items: Vec<CandidateItem>,
    keywords: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SourceAdapter for StaticAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn fetch_raw(&self, keyword: &str, _filters: &FilterSpec) -> Result<Vec<CandidateItem>> {
        self.keywords.lock().await.push(keyword.to_string());
        Ok(self.items.clone())
    }

    fn generate_affiliate_link(&self, item: &CandidateItem) -> String {
        item.product_url.clone()
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, item: &CandidateItem) -> Result<()> {
        self.published.lock().await.push(item.external_id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn publication_records_through_the_store_trait() {
    let store = SqliteStore::new(memory_pool().await);
    let item = CandidateItem::new("amazon", "B0X", "Kettle", 600.0, 1500.0);

    assert!(!store.is_published("B0X", "amazon").await.unwrap());
    store.mark_published(&item).await.unwrap();
    // a second mark is absorbed by the uniqueness constraint
    store.mark_published(&item).await.unwrap();
    assert!(store.is_published("B0X", "amazon").await.unwrap());
    assert!(!store.is_published("B0X", "flipkart").await.unwrap());
    assert_eq!(db::count_published(store.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn keyword_rotation_persists_usage() {
    let store = Arc::new(SqliteStore::new(memory_pool().await));
    for term in ["earbuds", "smartwatch", "air fryer"] {
        db::add_keyword(store.pool(), term, None).await.unwrap();
    }
    let selector = KeywordSelector::new(store.clone());

    let mut picked = Vec::new();
    for _ in 0..4 {
        picked.push(selector.select_next().await);
    }
    assert_eq!(picked, vec!["earbuds", "smartwatch", "air fryer", "earbuds"]);

    let usage: Vec<i64> = store
        .list_keywords()
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.usage_count)
        .collect();
    assert_eq!(usage, vec![2, 1, 1]);
}

#[tokio::test]
async fn only_enabled_settings_are_listed() {
    let store = SqliteStore::new(memory_pool().await);
    let added = db::seed_source_settings(
        store.pool(),
        &[
            SourceSettings::new("amazon"),
            SourceSettings {
                enabled: false,
                ..SourceSettings::new("flipkart")
            },
        ],
    )
    .await
    .unwrap();
    assert_eq!(added, 2);

    let enabled = store.list_enabled_sources().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].source_id, "amazon");
}

#[tokio::test]
async fn runs_publish_distinct_deals_until_exhausted() {
    let pool = memory_pool().await;
    db::seed_source_settings(&pool, &[SourceSettings::new("shop")])
        .await
        .unwrap();
    db::add_keyword(&pool, "headphones", None).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));

    let adapter = Arc::new(StaticAdapter {
        id: "shop".into(),
        items: vec![
            CandidateItem::new("shop", "p1", "Headphones One", 400.0, 1000.0),
            CandidateItem::new("shop", "p2", "Headphones Two", 200.0, 1000.0),
            CandidateItem::new("shop", "p3", "Headphones Three", 900.0, 1000.0),
        ],
        keywords: Mutex::new(Vec::new()),
    });
    let cache = Arc::new(SearchCache::default());
    let registry = Arc::new(SourceRegistry::new(cache.clone()));
    registry.register_source(adapter.clone()).await;
    registry.initialize().await;

    let publisher = Arc::new(RecordingPublisher::default());
    let engine = DealEngine::new(
        EngineDeps {
            sources: registry,
            cache,
            keywords: KeywordSelector::new(store.clone()),
            settings: store.clone(),
            published: store.clone(),
            publisher: publisher.clone(),
            notifier: Arc::new(LogNotifier),
        },
        EngineOptions::default(),
    );

    let first = engine.run_once().await;
    let second = engine.run_once().await;
    let third = engine.run_once().await;

    assert!(matches!(first, RunOutcome::Published { discount_percent: 80, .. }));
    assert!(matches!(second, RunOutcome::Published { discount_percent: 60, .. }));
    // p3 sits below the default 50% floor and never qualifies
    assert_eq!(third, RunOutcome::AllPublished);

    assert_eq!(*publisher.published.lock().await, vec!["p2", "p1"]);
    assert_eq!(db::count_published(store.pool()).await.unwrap(), 2);
    // later runs are served from the cache
    assert_eq!(adapter.keywords.lock().await.clone(), vec!["headphones"]);
}
