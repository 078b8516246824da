//! Row types returned by repositories.

use anyhow::{Context, Result};
use sqlx::FromRow;

use crate::model::SourceSettings;

/// A publication record.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PublishedDeal {
    pub id: i64,
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub discount_percent: i64,
    pub current_price: f64,
    pub publish_link: String,
    /// Unix seconds.
    pub published_at: i64,
}

/// `source_settings` row; list columns hold JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub struct SourceSettingsRow {
    pub source_id: String,
    pub enabled: bool,
    pub priority: i64,
    pub posting_weight: f64,
    pub min_discount: i64,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub categories: String,
    pub include_keywords: String,
    pub exclude_keywords: String,
}

impl SourceSettingsRow {
    pub fn into_settings(self) -> Result<SourceSettings> {
        let list = |raw: &str, column: &str| -> Result<Vec<String>> {
            serde_json::from_str(raw).with_context(|| {
                format!("invalid {column} JSON for source '{}'", self.source_id)
            })
        };
        Ok(SourceSettings {
            categories: list(&self.categories, "categories")?,
            include_keywords: list(&self.include_keywords, "include_keywords")?,
            exclude_keywords: list(&self.exclude_keywords, "exclude_keywords")?,
            source_id: self.source_id.clone(),
            enabled: self.enabled,
            priority: self.priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            posting_weight: self.posting_weight,
            min_discount: self.min_discount.clamp(0, 100) as u8,
            price_min: self.price_min,
            price_max: self.price_max,
        })
    }
}
