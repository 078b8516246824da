use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SourceAdapter;
use crate::model::{CandidateItem, FilterSpec};

pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1500);
pub const DEFAULT_MAX_PRODUCTS: usize = 10;
const MIN_TITLE_LEN: usize = 10;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static SEL_RESULT: Lazy<Selector> =
    Lazy::new(|| selector(r#"div[data-component-type="s-search-result"]"#));
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| selector("h2 span"));
static SEL_PRICE: Lazy<Selector> =
    Lazy::new(|| selector(".a-price:not(.a-text-price) .a-offscreen"));
static SEL_LIST_PRICE: Lazy<Selector> =
    Lazy::new(|| selector(".a-price.a-text-price .a-offscreen"));
static SEL_IMAGE: Lazy<Selector> = Lazy::new(|| selector("img.s-image"));
static SEL_RATING: Lazy<Selector> = Lazy::new(|| {
    selector(".a-icon-star-small .a-icon-alt, .a-icon-star-mini .a-icon-alt")
});
static SEL_REVIEWS: Lazy<Selector> = Lazy::new(|| selector(r#"a[href*="customerReviews"] span"#));

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.?\d*)").expect("static regex"));

/// Settings for the search-page scraper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperOptions {
    pub base_url: String,
    pub partner_tag: Option<String>,
    /// Politeness delay before every page request.
    pub request_delay: Duration,
    pub max_products: usize,
    pub timeout: Duration,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            base_url: "https://www.amazon.in".to_string(),
            partner_tag: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            max_products: DEFAULT_MAX_PRODUCTS,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Adapter that scrapes a marketplace search results page.
pub struct ScraperAdapter {
    id: String,
    http: Client,
    opts: ScraperOptions,
    ready: AtomicBool,
}

impl fmt::Debug for ScraperAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperAdapter")
            .field("id", &self.id)
            .field("base_url", &self.opts.base_url)
            .finish_non_exhaustive()
    }
}

impl ScraperAdapter {
    pub fn new(id: impl Into<String>, mut opts: ScraperOptions) -> Result<Self> {
        opts.base_url = opts.base_url.trim_end_matches('/').to_string();
        let http = Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(opts.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            id: id.into(),
            http,
            opts,
            ready: AtomicBool::new(false),
        })
    }

    pub fn search_url(&self, keyword: &str) -> Result<reqwest::Url> {
        let base = format!("{}/s", self.opts.base_url);
        reqwest::Url::parse_with_params(&base, &[("k", keyword)])
            .context("invalid scraper base URL")
    }

    fn link_for(&self, asin: &str) -> String {
        match self.opts.partner_tag.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(tag) => format!("{}/dp/{asin}?tag={tag}", self.opts.base_url),
            None => format!("{}/dp/{asin}", self.opts.base_url),
        }
    }

    /// Extract at most `limit` candidates from a search results page.
    /// Result blocks without an id, a plausible title or a price are skipped.
    pub fn parse_search_page(&self, html: &str, limit: usize) -> Vec<CandidateItem> {
        let doc = Html::parse_document(html);
        let mut out = Vec::new();

        for el in doc.select(&SEL_RESULT) {
            if out.len() >= limit {
                break;
            }
            let Some(asin) = el.value().attr("data-asin").filter(|a| !a.is_empty()) else {
                continue;
            };
            let title = first_text(&el, &SEL_TITLE);
            if title.chars().count() < MIN_TITLE_LEN {
                continue;
            }
            let Some(current) = parse_price(&first_text(&el, &SEL_PRICE)).filter(|p| *p > 0.0)
            else {
                continue;
            };
            let original = parse_price(&first_text(&el, &SEL_LIST_PRICE))
                .filter(|p| *p > current)
                .unwrap_or(current);

            let mut item = CandidateItem::new(&self.id, asin, title, current, original);
            item.image_url = el
                .select(&SEL_IMAGE)
                .next()
                .and_then(|img| img.value().attr("src"))
                .unwrap_or_default()
                .to_string();
            item.rating = RE_NUMBER
                .captures(&first_text(&el, &SEL_RATING))
                .and_then(|c| c[1].parse::<f32>().ok())
                .unwrap_or(0.0);
            item.review_count = first_text(&el, &SEL_REVIEWS)
                .replace(',', "")
                .trim()
                .parse()
                .unwrap_or(0);
            item.product_url = format!("{}/dp/{asin}", self.opts.base_url);
            item.publish_link = self.link_for(asin);
            out.push(item);
        }
        out
    }
}

fn first_text(el: &ElementRef<'_>, sel: &Selector) -> String {
    el.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Parse a displayed price such as `₹1,299.00`.
fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '₹') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

#[async_trait]
impl SourceAdapter for ScraperAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        if self.opts.partner_tag.as_deref().map_or(true, |t| t.trim().is_empty()) {
            warn!(source = %self.id, "partner tag not configured; links carry no tag");
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(
            source = %self.id,
            base_url = %self.opts.base_url,
            delay_ms = self.opts.request_delay.as_millis() as u64,
            "scraper source initialized"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch_raw(&self, keyword: &str, filters: &FilterSpec) -> Result<Vec<CandidateItem>> {
        tokio::time::sleep(self.opts.request_delay).await;

        let url = self.search_url(keyword)?;
        debug!(source = %self.id, %url, "fetching search page");
        let res = self
            .http
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .with_context(|| format!("failed to reach source '{}'", self.id))?;
        if !res.status().is_success() {
            return Err(anyhow!("source '{}' returned {}", self.id, res.status()));
        }
        let body = res
            .text()
            .await
            .with_context(|| format!("failed to read page from '{}'", self.id))?;

        let limit = filters
            .max_results
            .filter(|n| *n > 0)
            .unwrap_or(self.opts.max_products)
            .min(self.opts.max_products);
        let items = self.parse_search_page(&body, limit);
        if items.is_empty() {
            warn!(source = %self.id, "no products found on page; markup may have changed");
        }
        Ok(items)
    }

    fn generate_affiliate_link(&self, item: &CandidateItem) -> String {
        self.link_for(&item.external_id)
    }
}
