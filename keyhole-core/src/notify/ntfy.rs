//! ntfy.sh channel: plain text POST to a topic with a Title header.

use async_trait::async_trait;

use crate::config::NtfyConfig;

use super::{ChannelError, SummaryChannel};

#[derive(Debug, Clone)]
pub struct NtfyChannel {
    http: reqwest::Client,
    server: String,
    topic: String,
}

impl NtfyChannel {
    pub fn new(config: &NtfyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: config.server.trim_end_matches('/').to_string(),
            topic: config.topic.clone(),
        }
    }
}

#[async_trait]
impl SummaryChannel for NtfyChannel {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn send_summary(&self, title: &str, message: &str) -> Result<(), ChannelError> {
        self.http
            .post(format!("{}/{}", self.server, self.topic))
            .header("Title", title)
            .body(message.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
