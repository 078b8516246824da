use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tg_dealbot::cache::{SearchCache, SCOPE_ALL};
use tg_dealbot::error::FetchError;
use tg_dealbot::model::{CandidateItem, FilterSpec, SourceSettings};
use tg_dealbot::registry::{SourceRegistry, UNSET_PRIORITY};
use tg_dealbot::source::SourceAdapter;
use tokio::sync::Mutex;

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct FakeAdapter {
    id: String,
    init_ok: bool,
    ready: AtomicBool,
    behavior: Behavior,
    items: Vec<CandidateItem>,
    requests: Mutex<Vec<(String, FilterSpec)>>,
}

impl FakeAdapter {
    fn new(id: &str, items: Vec<CandidateItem>) -> Self {
        Self {
            id: id.to_string(),
            init_ok: true,
            ready: AtomicBool::new(false),
            behavior: Behavior::Succeed,
            items,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn uninitializable(mut self) -> Self {
        self.init_ok = false;
        self
    }

    async fn requests(&self) -> Vec<(String, FilterSpec)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FakeAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        if !self.init_ok {
            return Err(anyhow!("missing credentials"));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch_raw(&self, keyword: &str, filters: &FilterSpec) -> Result<Vec<CandidateItem>> {
        self.requests
            .lock()
            .await
            .push((keyword.to_string(), filters.clone()));
        match self.behavior {
            Behavior::Succeed => Ok(self.items.clone()),
            Behavior::Fail => Err(anyhow!("upstream returned 503")),
            Behavior::Panic => panic!("adapter exploded"),
        }
    }

    fn generate_affiliate_link(&self, item: &CandidateItem) -> String {
        format!("{}?tag=test", item.product_url)
    }
}

fn deal(source: &str, id: &str, discount: u8) -> CandidateItem {
    let current = 1000.0 * f64::from(100 - discount) / 100.0;
    CandidateItem::new(source, id, format!("Deal {id}"), current, 1000.0)
}

fn settings(id: &str, weight: f64, priority: i32) -> SourceSettings {
    SourceSettings {
        posting_weight: weight,
        priority,
        ..SourceSettings::new(id)
    }
}

async fn registry_with(
    adapters: Vec<Arc<FakeAdapter>>,
    cfg: Vec<SourceSettings>,
) -> SourceRegistry {
    let registry = SourceRegistry::new(Arc::new(SearchCache::default()));
    for adapter in adapters {
        registry.register_source(adapter).await;
    }
    registry.initialize().await;
    registry.update_settings(cfg).await;
    registry
}

fn ids(items: &[CandidateItem]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|i| format!("{}/{}", i.source_id, i.external_id))
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn each_source_is_asked_for_its_overfetched_share() {
    let a = Arc::new(FakeAdapter::new("a", vec![deal("a", "a1", 70)]));
    let b = Arc::new(FakeAdapter::new("b", vec![deal("b", "b1", 80)]));
    let registry = registry_with(
        vec![a.clone(), b.clone()],
        vec![settings("a", 60.0, 1), settings("b", 40.0, 2)],
    )
    .await;

    let items = registry.fetch_all("  running shoes ", 10).await.unwrap();
    assert_eq!(ids(&items), vec!["a/a1", "b/b1"]);

    let a_req = a.requests().await;
    let b_req = b.requests().await;
    assert_eq!(a_req.len(), 1);
    assert_eq!(a_req[0].0, "running shoes");
    assert_eq!(a_req[0].1.max_results, Some(30));
    assert_eq!(b_req[0].1.max_results, Some(20));
}

#[tokio::test]
async fn duplicate_offers_are_collapsed() {
    let a = Arc::new(FakeAdapter::new(
        "a",
        vec![deal("a", "x", 70), deal("a", "x", 75), deal("a", "y", 60)],
    ));
    let b = Arc::new(FakeAdapter::new("b", vec![deal("b", "x", 90)]));
    let registry = registry_with(
        vec![a, b],
        vec![settings("a", 50.0, 1), settings("b", 50.0, 2)],
    )
    .await;

    let items = registry.fetch_all("phones", 10).await.unwrap();
    assert_eq!(ids(&items), vec!["a/x", "a/y", "b/x"]);
}

#[tokio::test]
async fn source_settings_filter_results() {
    let a = Arc::new(FakeAdapter::new(
        "a",
        vec![deal("a", "low", 30), deal("a", "high", 70)],
    ));
    let registry = registry_with(vec![a], vec![settings("a", 100.0, 1)]).await;

    let items = registry.fetch_all("tv", 4).await.unwrap();
    assert_eq!(ids(&items), vec!["a/high"]);
}

#[tokio::test]
async fn panicking_source_does_not_cancel_siblings() {
    let a = Arc::new(FakeAdapter::new("a", vec![]).behaving(Behavior::Panic));
    let b = Arc::new(FakeAdapter::new("b", vec![deal("b", "b1", 65)]));
    let registry = registry_with(
        vec![a.clone(), b],
        vec![settings("a", 50.0, 1), settings("b", 50.0, 2)],
    )
    .await;

    let items = registry.fetch_all("laptops", 10).await.unwrap();
    assert_eq!(ids(&items), vec!["b/b1"]);
    assert_eq!(a.requests().await.len(), 1);
}

#[tokio::test]
async fn every_source_panicking_fails_the_fetch() {
    let a = Arc::new(FakeAdapter::new("a", vec![]).behaving(Behavior::Panic));
    let b = Arc::new(FakeAdapter::new("b", vec![]).behaving(Behavior::Panic));
    let registry = registry_with(
        vec![a, b],
        vec![settings("a", 50.0, 1), settings("b", 50.0, 2)],
    )
    .await;

    let err = registry.fetch_all("laptops", 10).await.unwrap_err();
    assert!(matches!(err, FetchError::AllSourcesFailed { attempted: 2 }));
}

#[tokio::test]
async fn source_errors_degrade_to_empty_results() {
    let a = Arc::new(FakeAdapter::new("a", vec![]).behaving(Behavior::Fail));
    let registry = registry_with(vec![a.clone()], vec![settings("a", 100.0, 1)]).await;

    let items = registry.fetch_all("watches", 10).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(a.requests().await.len(), 1);
}

#[tokio::test]
async fn not_ready_and_disabled_sources_are_skipped() {
    let a = Arc::new(FakeAdapter::new("a", vec![deal("a", "a1", 60)]));
    let b = Arc::new(FakeAdapter::new("b", vec![deal("b", "b1", 60)]).uninitializable());
    let c = Arc::new(FakeAdapter::new("c", vec![deal("c", "c1", 60)]));
    let registry = registry_with(
        vec![a.clone(), b.clone(), c.clone()],
        vec![
            settings("a", 50.0, 1),
            settings("b", 50.0, 2),
            SourceSettings {
                enabled: false,
                ..settings("c", 50.0, 3)
            },
        ],
    )
    .await;

    let items = registry.fetch_all("bags", 10).await.unwrap();
    assert_eq!(ids(&items), vec!["a/a1"]);
    assert_eq!(a.requests().await[0].1.max_results, Some(25));
    assert!(b.requests().await.is_empty());
    assert!(c.requests().await.is_empty());
}

#[tokio::test]
async fn blank_keyword_is_rejected() {
    let a = Arc::new(FakeAdapter::new("a", vec![deal("a", "a1", 60)]));
    let registry = registry_with(vec![a.clone()], vec![settings("a", 100.0, 1)]).await;

    let err = registry.fetch_all("   ", 10).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidKeyword));
    assert!(a.requests().await.is_empty());
}

#[tokio::test]
async fn only_changed_settings_invalidate_the_cache() {
    let a = Arc::new(FakeAdapter::new("a", vec![]));
    let b = Arc::new(FakeAdapter::new("b", vec![]));
    let initial = vec![settings("a", 60.0, 1), settings("b", 40.0, 2)];
    let registry = registry_with(vec![a, b], initial.clone()).await;
    let cache = registry.cache().clone();
    let filters = FilterSpec::default();

    cache.set(SCOPE_ALL, "shoes", vec![deal("a", "a1", 60)], &filters, None);
    let mut reordered = initial.clone();
    reordered.reverse();
    assert!(!registry.update_settings(reordered).await);
    assert_eq!(cache.len(), 1);

    let changed = vec![
        SourceSettings {
            min_discount: 30,
            ..settings("a", 60.0, 1)
        },
        settings("b", 40.0, 2),
    ];
    assert!(registry.update_settings(changed).await);
    assert!(cache.is_empty());
    assert_eq!(registry.settings().await[0].min_discount, 30);
}

#[tokio::test]
async fn stats_report_unconfigured_sources() {
    let a = Arc::new(FakeAdapter::new("a", vec![]));
    let b = Arc::new(FakeAdapter::new("b", vec![]).uninitializable());
    let registry = registry_with(vec![a, b], vec![settings("a", 70.0, 1)]).await;

    let stats = registry.stats().await;
    assert_eq!(stats.source_count, 2);
    assert_eq!(stats.enabled_count, 1);
    assert_eq!(stats.disabled_count, 1);

    let a_stats = &stats.per_source["a"];
    assert!(a_stats.enabled && a_stats.ready);
    assert_eq!(a_stats.priority, 1);
    assert_eq!(a_stats.weight, 70.0);

    let b_stats = &stats.per_source["b"];
    assert!(!b_stats.enabled && !b_stats.ready);
    assert_eq!(b_stats.priority, UNSET_PRIORITY);
}

#[tokio::test]
async fn disabled_sources_keep_their_configured_stats() {
    let a = Arc::new(FakeAdapter::new("a", vec![]));
    let b = Arc::new(FakeAdapter::new("b", vec![]));
    let registry = registry_with(
        vec![a, b.clone()],
        vec![
            settings("a", 70.0, 1),
            SourceSettings {
                enabled: false,
                ..settings("b", 30.0, 2)
            },
        ],
    )
    .await;

    let stats = registry.stats().await;
    assert_eq!((stats.enabled_count, stats.disabled_count), (1, 1));
    let b_stats = &stats.per_source["b"];
    assert!(!b_stats.enabled && b_stats.ready);
    assert_eq!((b_stats.priority, b_stats.weight), (2, 30.0));

    registry.fetch_all("kettles", 10).await.unwrap();
    assert!(b.requests().await.is_empty());
}

#[tokio::test]
async fn single_source_fetch() {
    let a = Arc::new(FakeAdapter::new(
        "a",
        vec![deal("a", "a1", 40), deal("a", "a2", 55)],
    ));
    let b = Arc::new(FakeAdapter::new("b", vec![]).uninitializable());
    // no settings for "a": defaults apply, including the 50% floor
    let registry = registry_with(vec![a.clone(), b], vec![]).await;

    let items = registry.fetch_from_source("a", "mixers", 3).await.unwrap();
    assert_eq!(ids(&items), vec!["a/a2"]);
    assert_eq!(a.requests().await[0].1.max_results, Some(3));

    assert!(matches!(
        registry.fetch_from_source("zzz", "mixers", 3).await,
        Err(FetchError::UnknownSource(id)) if id == "zzz"
    ));
    assert!(matches!(
        registry.fetch_from_source("b", "mixers", 3).await,
        Err(FetchError::SourceNotReady(id)) if id == "b"
    ));
}
