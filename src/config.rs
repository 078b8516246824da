//! Configuration loader and validator for the deal bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::SourceSettings;
use crate::publish::parse_recipient;
use crate::retry::RetryPolicy;
use crate::source::api::{ApiCredentials, DEFAULT_API_BASE};
use crate::source::scraper::ScraperOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub retry: Retry,
    pub telegram: Telegram,
    pub sources: Sources,
    #[serde(default)]
    pub keywords: Keywords,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub schedule_interval_secs: u64,
    #[serde(default)]
    pub initial_delay_secs: u64,
    pub products_per_run: usize,
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
    #[serde(default = "default_retention_days")]
    pub published_retention_days: i64,
}

fn default_overfetch() -> usize {
    5
}

fn default_retention_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            max_entries: 1000,
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// `@channel_username` or numeric chat id.
    pub channel: String,
    #[serde(default)]
    pub admin_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sources {
    #[serde(default)]
    pub api: Option<ApiSource>,
    #[serde(default)]
    pub scraper: Option<ScraperSource>,
    /// Inserted into the settings store on first start; rows already present
    /// are left alone.
    #[serde(default)]
    pub settings: Vec<SourceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiSource {
    pub id: String,
    #[serde(default = "default_api_base")]
    pub base_url: String,
    pub affiliate_id: String,
    pub api_token: String,
    pub tracking_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScraperSource {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub partner_tag: Option<String>,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_products")]
    pub max_products: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_request_delay_ms() -> u64 {
    1500
}

fn default_max_products() -> usize {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keywords {
    /// Rotated when the keyword pool is empty. Empty means the built-in list.
    #[serde(default)]
    pub fallback: Vec<String>,
    /// Added to the keyword pool on start if missing.
    #[serde(default)]
    pub seed: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` when set, else a file under the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/dealbot.db", self.app.data_dir))
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.app.schedule_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.app.initial_delay_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }
}

impl Cache {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ApiSource {
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials {
            affiliate_id: self.affiliate_id.clone(),
            api_token: self.api_token.clone(),
            tracking_id: self.tracking_id.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScraperSource {
    pub fn options(&self) -> ScraperOptions {
        ScraperOptions {
            base_url: self.base_url.clone(),
            partner_tag: self.partner_tag.clone(),
            request_delay: Duration::from_millis(self.request_delay_ms),
            max_products: self.max_products,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.schedule_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.schedule_interval_secs must be > 0"));
    }
    if cfg.app.products_per_run == 0 {
        return Err(ConfigError::Invalid("app.products_per_run must be > 0"));
    }
    if cfg.app.overfetch_factor == 0 {
        return Err(ConfigError::Invalid("app.overfetch_factor must be > 0"));
    }
    if cfg.app.published_retention_days <= 0 {
        return Err(ConfigError::Invalid("app.published_retention_days must be > 0"));
    }

    if cfg.cache.ttl_secs == 0 {
        return Err(ConfigError::Invalid("cache.ttl_secs must be > 0"));
    }
    if cfg.cache.max_entries == 0 {
        return Err(ConfigError::Invalid("cache.max_entries must be > 0"));
    }
    if cfg.cache.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid("cache.sweep_interval_secs must be > 0"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if parse_recipient(&cfg.telegram.channel).is_none() {
        return Err(ConfigError::Invalid(
            "telegram.channel must be @username or a numeric chat id",
        ));
    }

    if cfg.sources.api.is_none() && cfg.sources.scraper.is_none() {
        return Err(ConfigError::Invalid("sources must configure api or scraper"));
    }
    if let Some(api) = &cfg.sources.api {
        if api.id.trim().is_empty() {
            return Err(ConfigError::Invalid("sources.api.id must be non-empty"));
        }
        if reqwest::Url::parse(&api.base_url).is_err() {
            return Err(ConfigError::Invalid("sources.api.base_url must be a valid URL"));
        }
    }
    if let Some(scraper) = &cfg.sources.scraper {
        if scraper.id.trim().is_empty() {
            return Err(ConfigError::Invalid("sources.scraper.id must be non-empty"));
        }
        if reqwest::Url::parse(&scraper.base_url).is_err() {
            return Err(ConfigError::Invalid("sources.scraper.base_url must be a valid URL"));
        }
        if scraper.max_products == 0 {
            return Err(ConfigError::Invalid("sources.scraper.max_products must be > 0"));
        }
    }
    for s in &cfg.sources.settings {
        if s.source_id.trim().is_empty() {
            return Err(ConfigError::Invalid("sources.settings[].source_id must be non-empty"));
        }
        if !s.posting_weight.is_finite() || s.posting_weight < 0.0 {
            return Err(ConfigError::Invalid("sources.settings[].posting_weight must be >= 0"));
        }
        if s.min_discount > 100 {
            return Err(ConfigError::Invalid("sources.settings[].min_discount must be <= 100"));
        }
        if let (Some(lo), Some(hi)) = (s.price_min, s.price_max) {
            if lo > hi {
                return Err(ConfigError::Invalid(
                    "sources.settings[].price_min must not exceed price_max",
                ));
            }
        }
    }

    Ok(())
}

/// Returns an example YAML document accepted by [`load`].
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  schedule_interval_secs: 7200
  initial_delay_secs: 30
  products_per_run: 10
  overfetch_factor: 5
  published_retention_days: 30

cache:
  ttl_secs: 900
  max_entries: 1000
  sweep_interval_secs: 300

retry:
  max_attempts: 3
  base_delay_ms: 2000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  channel: "@your_deals_channel"
  admin_chat_id: 123456789

sources:
  api:
    id: "flipkart"
    affiliate_id: "YOUR_AFFILIATE_ID"
    api_token: "YOUR_API_TOKEN"
    tracking_id: "YOUR_TRACKING_ID"
  scraper:
    id: "amazon-scraper"
    base_url: "https://www.amazon.in"
    partner_tag: "yourtag-21"
    request_delay_ms: 1500
    max_products: 10
  settings:
    - source_id: "amazon-scraper"
      priority: 1
      posting_weight: 60
      min_discount: 50
    - source_id: "flipkart"
      priority: 2
      posting_weight: 40
      min_discount: 40
      price_max: 50000
      exclude_keywords: ["refurbished"]

keywords:
  seed:
    - "wireless earbuds"
    - "smartwatch"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sources.settings.len(), 2);
        assert_eq!(cfg.sources.settings[1].exclude_keywords, vec!["refurbished"]);
        assert_eq!(cfg.sources.api.as_ref().unwrap().base_url, DEFAULT_API_BASE);
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn sections_fall_back_to_defaults() {
        let yaml = r#"app:
  data_dir: "./d"
  schedule_interval_secs: 60
  products_per_run: 5
telegram:
  bot_token: "t"
  channel: "-100123"
sources:
  scraper:
    id: "s"
    base_url: "https://example.com"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.cache, Cache::default());
        assert_eq!(cfg.app.overfetch_factor, 5);
        assert_eq!(cfg.sources.scraper.unwrap().request_delay_ms, 1500);
        assert!(cfg.keywords.fallback.is_empty());
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_channel() {
        let mut cfg = example_cfg();
        cfg.telegram.channel = "deals".into();
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::Invalid(m)) if m.contains("telegram.channel")
        ));
    }

    #[test]
    fn requires_a_source() {
        let mut cfg = example_cfg();
        cfg.sources.api = None;
        cfg.sources.scraper = None;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_settings_entries() {
        let mut cfg = example_cfg();
        cfg.sources.settings[0].posting_weight = -1.0;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::Invalid(m)) if m.contains("posting_weight")
        ));

        let mut cfg = example_cfg();
        cfg.sources.settings[0].price_min = Some(500.0);
        cfg.sources.settings[0].price_max = Some(100.0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("price_min")));

        let mut cfg = example_cfg();
        cfg.app.schedule_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.admin_chat_id, Some(123456789));
        assert_eq!(
            cfg.sources.scraper.unwrap().options().request_delay,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
