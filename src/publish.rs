//! Outbound delivery: publishing the winning deal and reporting failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Recipient};
use tracing::{error, info, warn};

use crate::model::CandidateItem;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: &CandidateItem) -> Result<()>;
}

#[async_trait]
pub trait ErrorNotifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// `@name` targets a public channel, anything numeric a chat id.
pub fn parse_recipient(raw: &str) -> Option<Recipient> {
    let raw = raw.trim();
    if raw.starts_with('@') && raw.len() > 1 {
        return Some(Recipient::ChannelUsername(raw.to_string()));
    }
    raw.parse::<i64>().ok().map(|id| Recipient::Id(ChatId(id)))
}

fn price(currency: &str, amount: f64) -> String {
    let symbol = match currency {
        "INR" => "₹".to_string(),
        "USD" => "$".to_string(),
        other => format!("{other} "),
    };
    if amount.fract() == 0.0 {
        format!("{symbol}{amount:.0}")
    } else {
        format!("{symbol}{amount:.2}")
    }
}

/// Plain-text post body for a deal.
pub fn format_caption(item: &CandidateItem) -> String {
    let mut out = format!("🔥 {}% OFF\n\n{}\n\n", item.discount_percent, item.title.trim());
    out.push_str(&format!("Price: {}", price(&item.currency, item.current_price)));
    if item.original_price > item.current_price {
        out.push_str(&format!(" (was {})", price(&item.currency, item.original_price)));
    }
    out.push('\n');
    if item.rating > 0.0 {
        out.push_str(&format!("Rating: {:.1}/5", item.rating));
        if item.review_count > 0 {
            out.push_str(&format!(" ({} reviews)", item.review_count));
        }
        out.push('\n');
    }
    let link = if item.publish_link.is_empty() {
        &item.product_url
    } else {
        &item.publish_link
    };
    if !link.is_empty() {
        out.push_str(&format!("\n{link}"));
    }
    out
}

/// Posts deals to a Telegram channel.
pub struct TelegramPublisher {
    bot: Bot,
    channel: Recipient,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, channel: Recipient) -> Self {
        Self { bot, channel }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, item: &CandidateItem) -> Result<()> {
        let caption = format_caption(item);
        match Url::parse(&item.image_url) {
            Ok(url) => {
                self.bot
                    .send_photo(self.channel.clone(), InputFile::url(url))
                    .caption(caption)
                    .await
                    .context("failed to send deal photo")?;
            }
            Err(_) => {
                self.bot
                    .send_message(self.channel.clone(), caption)
                    .await
                    .context("failed to send deal message")?;
            }
        }
        info!(source = %item.source_id, id = %item.external_id, "deal published");
        Ok(())
    }
}

/// Sends failure reports to an admin chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat: Recipient,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat: Recipient) -> Self {
        Self { bot, chat }
    }
}

#[async_trait]
impl ErrorNotifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        let text = format!("⚠️ {message}");
        if let Err(err) = self.bot.send_message(self.chat.clone(), text).await {
            warn!(?err, "failed to deliver error notification");
        }
    }
}

/// Notifier used when no admin chat is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ErrorNotifier for LogNotifier {
    async fn notify(&self, message: &str) {
        error!(message, "run error");
    }
}
