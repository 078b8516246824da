use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a freshly fetched offer is considered current.
pub const ITEM_FRESHNESS_SECS: i64 = 3600;

/// A normalized product offer returned by one source for one search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateItem {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub current_price: f64,
    pub original_price: f64,
    pub discount_percent: u8,
    pub currency: String,
    pub image_url: String,
    pub category: String,
    pub brand: String,
    pub rating: f32,
    pub review_count: u32,
    pub in_stock: bool,
    pub product_url: String,
    pub publish_link: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CandidateItem {
    /// Skeleton with identity, title and prices set; everything else defaulted.
    /// The discount is derived from the two prices.
    pub fn new(
        source_id: impl Into<String>,
        external_id: impl Into<String>,
        title: impl Into<String>,
        current_price: f64,
        original_price: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            external_id: external_id.into(),
            title: title.into(),
            current_price,
            original_price,
            discount_percent: crate::filter::calculate_discount(original_price, current_price),
            currency: "INR".to_string(),
            image_url: String::new(),
            category: "General".to_string(),
            brand: String::new(),
            rating: 0.0,
            review_count: 0,
            in_stock: true,
            product_url: String::new(),
            publish_link: String::new(),
            fetched_at: now,
            expires_at: now + Duration::seconds(ITEM_FRESHNESS_SECS),
        }
    }

    /// Identity of an offer: `(source_id, external_id)`.
    pub fn key(&self) -> (&str, &str) {
        (&self.source_id, &self.external_id)
    }

    /// Lowercased text the keyword filters match against.
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.title, self.category, self.brand).to_lowercase()
    }
}

fn default_priority() -> i32 {
    1
}

fn default_weight() -> f64 {
    33.0
}

fn default_min_discount() -> u8 {
    50
}

fn default_true() -> bool {
    true
}

/// Per-source configuration as kept by the settings store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSettings {
    pub source_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower value wins.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Relative allocation weight; weights need not sum to anything in particular.
    #[serde(default = "default_weight")]
    pub posting_weight: f64,
    #[serde(default = "default_min_discount")]
    pub min_discount: u8,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub include_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

impl SourceSettings {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            enabled: true,
            priority: default_priority(),
            posting_weight: default_weight(),
            min_discount: default_min_discount(),
            price_min: None,
            price_max: None,
            categories: Vec::new(),
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
        }
    }

    /// Filters a source applies when asked for `max_results` items.
    pub fn filter_spec(&self, max_results: usize) -> FilterSpec {
        FilterSpec {
            min_discount: Some(self.min_discount),
            min_price: self.price_min,
            max_price: self.price_max,
            categories: self.categories.clone(),
            include_keywords: self.include_keywords.clone(),
            exclude_keywords: self.exclude_keywords.clone(),
            max_results: Some(max_results),
            in_stock_only: None,
        }
    }
}

/// Filter parameters shared by adapters and the cache fingerprint.
///
/// Every optional field has a canonical default, see [`FilterSpec::canonical`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterSpec {
    pub min_discount: Option<u8>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub categories: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub max_results: Option<usize>,
    pub in_stock_only: Option<bool>,
}

/// `FilterSpec` reduced to what the filter pipeline actually reads: two
/// specs with the same canonical form select the same items.
///
/// Non-positive price bounds disable the bound and canonicalize to `None`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CanonicalFilter {
    pub min_discount: u8,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub categories: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub max_results: usize,
    pub in_stock_only: bool,
}

impl FilterSpec {
    pub fn canonical(&self) -> CanonicalFilter {
        CanonicalFilter {
            min_discount: self.min_discount.unwrap_or(0),
            min_price: price_bound(self.min_price),
            max_price: price_bound(self.max_price),
            categories: normalize_terms(&self.categories),
            include_keywords: normalize_terms(&self.include_keywords),
            exclude_keywords: normalize_terms(&self.exclude_keywords),
            max_results: self.max_results.unwrap_or(0),
            in_stock_only: self.in_stock_only.unwrap_or(true),
        }
    }
}

/// A price bound is active only when positive.
pub fn price_bound(bound: Option<f64>) -> Option<f64> {
    bound.filter(|v| *v > 0.0)
}

/// Trim, lowercase, drop blanks, sort and dedup. All list filters match
/// case-insensitively and independently of order.
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// One entry of the keyword pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordEntry {
    pub id: i64,
    pub term: String,
    pub source_id: Option<String>,
    pub usage_count: i64,
}
