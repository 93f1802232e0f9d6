//! Discord webhook channel: one embed per summary.

use async_trait::async_trait;
use serde_json::json;

use crate::config::DiscordConfig;

use super::{ChannelError, SummaryChannel};

const EMBED_COLOR: u32 = 5_814_783;

#[derive(Debug, Clone)]
pub struct DiscordChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
        }
    }
}

#[async_trait]
impl SummaryChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send_summary(&self, title: &str, message: &str) -> Result<(), ChannelError> {
        self.http
            .post(&self.webhook_url)
            .json(&json!({
                "embeds": [{
                    "title": title,
                    "description": message,
                    "color": EMBED_COLOR,
                }]
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
