//! Persistence seams used by the run engine and keyword selector.
//!
//! The SQLite implementation lives in [`crate::db::SqliteStore`]; tests plug
//! in recording fakes.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{CandidateItem, KeywordEntry, SourceSettings};

#[async_trait]
pub trait PublishedStore: Send + Sync {
    async fn is_published(&self, external_id: &str, source_id: &str) -> Result<bool>;

    /// Record `item` as published. Recording an already published item is
    /// not an error.
    async fn mark_published(&self, item: &CandidateItem) -> Result<()>;
}

#[async_trait]
pub trait KeywordStore: Send + Sync {
    async fn list_keywords(&self) -> Result<Vec<KeywordEntry>>;
    async fn increment_usage(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn list_enabled_sources(&self) -> Result<Vec<SourceSettings>>;
}
