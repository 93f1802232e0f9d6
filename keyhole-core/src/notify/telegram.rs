//! Telegram Bot API channel. The only rich channel: albums via
//! `sendMediaGroup`, single photos via `sendPhoto`, text via `sendMessage`.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::enrich::SceneImage;

use super::{ChannelError, RichChannel, SummaryChannel};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramChannel {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.bot_token)
    }

    async fn check(response: reqwest::Response) -> Result<(), ChannelError> {
        if response.status().is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(ChannelError::Rejected {
            channel: "telegram",
            detail,
        })
    }
}

#[async_trait]
impl RichChannel for TelegramChannel {
    async fn send_media_group(
        &self,
        caption: &str,
        images: &[SceneImage],
    ) -> Result<(), ChannelError> {
        // Images ride as multipart attachments referenced from the media
        // descriptor list; the caption goes on the first item only.
        let mut form = reqwest::multipart::Form::new().text("chat_id", self.chat_id.clone());
        let mut items = Vec::new();

        for (index, image) in images.iter().enumerate() {
            let attach_name = format!("photo{index}");
            let mut item = json!({
                "type": "photo",
                "media": format!("attach://{attach_name}"),
            });
            if index == 0 {
                item["caption"] = json!(caption);
                item["parse_mode"] = json!("HTML");
            }
            items.push(item);

            let part = reqwest::multipart::Part::bytes(image.bytes.clone())
                .file_name(image.filename.clone());
            form = form.part(attach_name, part);
        }
        form = form.text("media", serde_json::Value::Array(items).to_string());

        debug!(images = images.len(), "sending Telegram media group");
        let response = self
            .http
            .post(self.method_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_photo(&self, caption: &str, image: &SceneImage) -> Result<(), ChannelError> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.filename.clone());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", part);

        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl SummaryChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_summary(&self, _title: &str, message: &str) -> Result<(), ChannelError> {
        self.send_text(message).await
    }
}
