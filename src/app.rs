//! Wiring shared by the binaries: store, sources, cache, engine.

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

use crate::cache::SearchCache;
use crate::config::Config;
use crate::db::{self, SqliteStore};
use crate::engine::{DealEngine, EngineDeps, EngineOptions};
use crate::keywords::KeywordSelector;
use crate::publish::{
    parse_recipient, ErrorNotifier, LogNotifier, Publisher, TelegramNotifier, TelegramPublisher,
};
use crate::registry::SourceRegistry;
use crate::source::{ApiAdapter, ScraperAdapter};

pub struct Runtime {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<SearchCache>,
    pub registry: Arc<SourceRegistry>,
    pub engine: Arc<DealEngine>,
}

/// Open the database, apply migrations and seed settings and keywords from
/// the config.
pub async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let seeded = db::seed_source_settings(&pool, &cfg.sources.settings).await?;
    for term in cfg.keywords.seed.iter().filter(|t| !t.trim().is_empty()) {
        db::add_keyword(&pool, term, None).await?;
    }
    info!(seeded_sources = seeded, seed_keywords = cfg.keywords.seed.len(), "database ready");
    Ok(SqliteStore::new(pool))
}

pub fn build_cache(cfg: &Config) -> Arc<SearchCache> {
    Arc::new(SearchCache::new(cfg.cache.ttl(), cfg.cache.max_entries))
}

/// Register the configured adapters and initialize them.
pub async fn build_registry(cfg: &Config, cache: Arc<SearchCache>) -> Result<Arc<SourceRegistry>> {
    let registry = Arc::new(SourceRegistry::with_overfetch(cache, cfg.app.overfetch_factor));
    if let Some(api) = &cfg.sources.api {
        let base = Url::parse(&api.base_url).context("invalid sources.api.base_url")?;
        let adapter = ApiAdapter::with_base_url(&api.id, api.credentials(), base, api.timeout())?;
        registry.register_source(Arc::new(adapter)).await;
    }
    if let Some(scraper) = &cfg.sources.scraper {
        let adapter = ScraperAdapter::new(&scraper.id, scraper.options())?;
        registry.register_source(Arc::new(adapter)).await;
    }
    registry.initialize().await;
    Ok(registry)
}

pub fn build_delivery(cfg: &Config) -> Result<(Arc<dyn Publisher>, Arc<dyn ErrorNotifier>)> {
    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let channel = parse_recipient(&cfg.telegram.channel)
        .ok_or_else(|| anyhow!("invalid telegram.channel '{}'", cfg.telegram.channel))?;
    let publisher: Arc<dyn Publisher> = Arc::new(TelegramPublisher::new(bot.clone(), channel));
    let notifier: Arc<dyn ErrorNotifier> = match cfg.telegram.admin_chat_id {
        Some(id) => Arc::new(TelegramNotifier::new(bot, ChatId(id).into())),
        None => Arc::new(LogNotifier),
    };
    Ok((publisher, notifier))
}

pub async fn build(cfg: &Config) -> Result<Runtime> {
    let store = Arc::new(open_store(cfg).await?);
    let cache = build_cache(cfg);
    let registry = build_registry(cfg, Arc::clone(&cache)).await?;
    let (publisher, notifier) = build_delivery(cfg)?;

    let keywords = if cfg.keywords.fallback.is_empty() {
        KeywordSelector::new(store.clone())
    } else {
        KeywordSelector::with_fallback(store.clone(), cfg.keywords.fallback.clone())
    };
    let engine = Arc::new(DealEngine::new(
        EngineDeps {
            sources: registry.clone(),
            cache: Arc::clone(&cache),
            keywords,
            settings: store.clone(),
            published: store.clone(),
            publisher,
            notifier,
        },
        EngineOptions {
            products_per_run: cfg.app.products_per_run,
            retry: cfg.retry_policy(),
        },
    ));

    Ok(Runtime {
        store,
        cache,
        registry,
        engine,
    })
}
