use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::repo::{self, Pool};
use crate::model::{CandidateItem, KeywordEntry, SourceSettings};
use crate::store::{KeywordStore, PublishedStore, SettingsStore};

/// SQLite-backed implementation of the persistence traits.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl PublishedStore for SqliteStore {
    async fn is_published(&self, external_id: &str, source_id: &str) -> Result<bool> {
        repo::is_published(&self.pool, source_id, external_id).await
    }

    async fn mark_published(&self, item: &CandidateItem) -> Result<()> {
        let inserted = repo::mark_published(&self.pool, item, Utc::now()).await?;
        if !inserted {
            debug!(
                source = %item.source_id,
                id = %item.external_id,
                "already recorded as published"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl KeywordStore for SqliteStore {
    async fn list_keywords(&self) -> Result<Vec<KeywordEntry>> {
        repo::list_keywords(&self.pool).await
    }

    async fn increment_usage(&self, id: i64) -> Result<()> {
        repo::increment_keyword_usage(&self.pool, id).await
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn list_enabled_sources(&self) -> Result<Vec<SourceSettings>> {
        repo::list_enabled_sources(&self.pool).await
    }
}
