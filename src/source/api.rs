use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SourceAdapter;
use crate::filter::calculate_discount;
use crate::model::{CandidateItem, FilterSpec};

pub const DEFAULT_API_BASE: &str = "https://affiliate-api.flipkart.net/affiliate/api/";
const DEFAULT_RESULT_COUNT: usize = 10;

/// Credentials for an affiliate product-search API.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiCredentials {
    pub affiliate_id: String,
    pub api_token: String,
    pub tracking_id: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("affiliate_id", &self.affiliate_id)
            .field("tracking_id", &self.tracking_id)
            .finish_non_exhaustive()
    }
}

impl ApiCredentials {
    fn is_complete(&self) -> bool {
        !self.affiliate_id.trim().is_empty() && !self.api_token.trim().is_empty()
    }
}

/// Adapter backed by a JSON product-search API
/// (`GET {base}/search.json?query=..&resultCount=..&trackingId=..`).
pub struct ApiAdapter {
    id: String,
    http: Client,
    base_url: Url,
    credentials: ApiCredentials,
    ready: AtomicBool,
}

impl fmt::Debug for ApiAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiAdapter")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub products: Vec<ApiProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProduct {
    pub product_id: String,
    pub title: String,
    #[serde(default)]
    pub special_price: Option<Money>,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub discount_percentage: Option<f64>,
    #[serde(default)]
    pub image_urls: HashMap<String, String>,
    #[serde(default)]
    pub category_path: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub review_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Money {
    pub amount: f64,
}

impl ApiAdapter {
    pub fn new(id: impl Into<String>, credentials: ApiCredentials) -> Result<Self> {
        let base_url = Url::parse(DEFAULT_API_BASE).context("invalid default API URL")?;
        Self::with_base_url(id, credentials, base_url, Duration::from_secs(10))
    }

    pub fn with_base_url(
        id: impl Into<String>,
        credentials: ApiCredentials,
        mut base_url: Url,
        timeout: Duration,
    ) -> Result<Self> {
        // `Url::join` drops the last segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("tg-dealbot/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            id: id.into(),
            http,
            base_url,
            credentials,
            ready: AtomicBool::new(false),
        })
    }

    pub fn search_url(&self) -> Result<Url> {
        self.base_url
            .join("search.json")
            .context("invalid API base URL")
    }

    /// Map one API response page into candidates. Entries without a usable
    /// price are dropped.
    pub fn parse_search_response(&self, resp: SearchResponse) -> Vec<CandidateItem> {
        let mut out = Vec::with_capacity(resp.products.len());
        for p in resp.products {
            let list_price = p.price.as_ref().map(|m| m.amount);
            let current = p
                .special_price
                .as_ref()
                .map(|m| m.amount)
                .or(list_price)
                .unwrap_or(0.0);
            if current <= 0.0 {
                debug!(
                    source = %self.id,
                    product = %p.product_id,
                    "skipping product without price"
                );
                continue;
            }
            let original = list_price.filter(|v| *v >= current).unwrap_or(current);

            let mut item = CandidateItem::new(&self.id, p.product_id, p.title, current, original);
            if let Some(pct) = p.discount_percentage.filter(|v| *v > 0.0) {
                item.discount_percent = pct.round().clamp(0.0, 100.0) as u8;
            } else {
                item.discount_percent = calculate_discount(original, current);
            }
            item.image_url = p
                .image_urls
                .get("400x400")
                .or_else(|| p.image_urls.get("200x200"))
                .cloned()
                .unwrap_or_default();
            if let Some(cat) = p.category_path.filter(|c| !c.trim().is_empty()) {
                item.category = cat;
            }
            item.brand = p.brand.unwrap_or_default();
            item.in_stock = p.in_stock != Some(false);
            item.rating = p.rating.unwrap_or(0.0);
            item.review_count = p.review_count.unwrap_or(0);
            item.product_url = p.product_url.unwrap_or_default();
            item.publish_link = self.generate_affiliate_link(&item);
            out.push(item);
        }
        out
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        if !self.credentials.is_complete() {
            warn!(source = %self.id, "API credentials missing; source stays disabled");
            self.ready.store(false, Ordering::SeqCst);
            return Err(anyhow!("source '{}' has no API credentials", self.id));
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(source = %self.id, base_url = %self.base_url, "API source initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch_raw(&self, keyword: &str, filters: &FilterSpec) -> Result<Vec<CandidateItem>> {
        let count = filters
            .max_results
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RESULT_COUNT);
        let url = self.search_url()?;
        debug!(source = %self.id, %url, keyword, count, "API search request");

        let res = self
            .http
            .get(url)
            .query(&[
                ("query", keyword.to_string()),
                ("resultCount", count.to_string()),
                ("trackingId", self.credentials.tracking_id.clone()),
            ])
            .header("Fk-Affiliate-Id", &self.credentials.affiliate_id)
            .header("Fk-Affiliate-Token", &self.credentials.api_token)
            .send()
            .await
            .with_context(|| format!("failed to reach source '{}'", self.id))?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("source '{}' rate limited the request", self.id));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("source '{}' error {}: {}", self.id, status, body));
        }

        let payload: SearchResponse = res
            .json()
            .await
            .with_context(|| format!("invalid search response from '{}'", self.id))?;
        Ok(self.parse_search_response(payload))
    }

    fn generate_affiliate_link(&self, item: &CandidateItem) -> String {
        let url = if item.product_url.is_empty() {
            format!("https://www.flipkart.com/product/p/{}", item.external_id)
        } else {
            item.product_url.clone()
        };
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}affid={}", self.credentials.tracking_id)
    }
}
