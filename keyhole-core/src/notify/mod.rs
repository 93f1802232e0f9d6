//! Notification dispatch with per-record content degradation.
//!
//! Rich delivery runs an ordered strategy chain per scene: media group,
//! then single photo, then bare text. A level's failure never escalates; it
//! falls through to the next. Above the volume threshold (or with no rich
//! channel configured) the dispatcher instead sends one dataset-grouped
//! summary per plain channel. Either way, every scene in the input set is
//! marked notified afterwards: delivery is at-least-attempted, not
//! confirmed.

pub mod discord;
pub mod ntfy;
pub mod telegram;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::{DatasetSpec, MonitorConfig};
use crate::enrich::{Enricher, HttpEnricher, SceneDetails, SceneImage};
use crate::error::Result;
use crate::scene::NewScene;
use crate::store::CatalogStore;

const SUMMARY_TITLE: &str = "USGS Declass Monitor";

/// Examples listed per dataset in a summary message.
const SUMMARY_EXAMPLES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{channel} rejected message: {detail}")]
    Rejected {
        channel: &'static str,
        detail: String,
    },
}

/// A channel that can carry per-scene messages with attached imagery.
#[async_trait]
pub trait RichChannel: Send + Sync {
    async fn send_media_group(
        &self,
        caption: &str,
        images: &[SceneImage],
    ) -> std::result::Result<(), ChannelError>;

    async fn send_photo(
        &self,
        caption: &str,
        image: &SceneImage,
    ) -> std::result::Result<(), ChannelError>;

    async fn send_text(&self, text: &str) -> std::result::Result<(), ChannelError>;
}

/// A channel that only carries plain summary text.
#[async_trait]
pub trait SummaryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_summary(
        &self,
        title: &str,
        message: &str,
    ) -> std::result::Result<(), ChannelError>;
}

pub struct Dispatcher {
    rich: Option<Arc<dyn RichChannel>>,
    plain: Vec<Arc<dyn SummaryChannel>>,
    enricher: Arc<dyn Enricher>,
    audit: AuditLog,
    datasets: HashMap<String, DatasetSpec>,
    max_individual: usize,
    send_delay: Duration,
}

impl Dispatcher {
    /// Wire up the configured channels and the HTTP enricher.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let channels = &config.notifications;

        let telegram = channels
            .telegram
            .enabled
            .then(|| Arc::new(telegram::TelegramChannel::new(&channels.telegram)));

        let rich: Option<Arc<dyn RichChannel>> =
            telegram.clone().map(|t| t as Arc<dyn RichChannel>);

        let mut plain: Vec<Arc<dyn SummaryChannel>> = Vec::new();
        if channels.ntfy.enabled {
            plain.push(Arc::new(ntfy::NtfyChannel::new(&channels.ntfy)));
        }
        if let Some(telegram) = telegram {
            plain.push(telegram);
        }
        if channels.discord.enabled {
            plain.push(Arc::new(discord::DiscordChannel::new(&channels.discord)));
        }

        Self::new(
            rich,
            plain,
            Arc::new(HttpEnricher::new()),
            AuditLog::new(config.metadata_urls_file.clone()),
            config
                .datasets
                .iter()
                .map(|spec| (spec.name.clone(), spec.clone()))
                .collect(),
            channels.telegram.max_individual_messages,
            Duration::from_millis(channels.telegram.send_delay_ms),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rich: Option<Arc<dyn RichChannel>>,
        plain: Vec<Arc<dyn SummaryChannel>>,
        enricher: Arc<dyn Enricher>,
        audit: AuditLog,
        datasets: HashMap<String, DatasetSpec>,
        max_individual: usize,
        send_delay: Duration,
    ) -> Self {
        Self {
            rich,
            plain,
            enricher,
            audit,
            datasets,
            max_individual,
            send_delay,
        }
    }

    /// Deliver the cycle's newly-available scenes and mark them notified.
    pub async fn dispatch(&self, scenes: &[NewScene], store: &CatalogStore) -> Result<()> {
        if scenes.is_empty() {
            return Ok(());
        }

        self.audit.append(scenes, &self.datasets)?;
        info!(count = scenes.len(), "recorded new scenes in audit file");

        match &self.rich {
            Some(rich) if scenes.len() <= self.max_individual => {
                info!(count = scenes.len(), "sending individual notifications");
                for scene in scenes {
                    self.send_rich(rich.as_ref(), scene).await;
                    tokio::time::sleep(self.send_delay).await;
                }
            }
            _ => {
                if scenes.len() > self.max_individual {
                    info!(
                        count = scenes.len(),
                        threshold = self.max_individual,
                        "too many scenes for individual messages, summarizing"
                    );
                }
                let message = summary_message(scenes);
                for channel in &self.plain {
                    match channel.send_summary(SUMMARY_TITLE, &message).await {
                        Ok(()) => info!(channel = channel.name(), "sent summary"),
                        Err(err) => {
                            warn!(channel = channel.name(), "summary delivery failed: {err}")
                        }
                    }
                }
            }
        }

        let ids: Vec<String> = scenes.iter().map(|s| s.record.entity_id.clone()).collect();
        store.mark_notified(&ids).await?;
        Ok(())
    }

    /// One scene, one message, degrading from album to photo to text. Every
    /// failure is swallowed here; the worst outcome is a log line.
    async fn send_rich(&self, channel: &dyn RichChannel, scene: &NewScene) {
        let (details, images) = self.enrich(scene).await;
        let caption = rich_caption(&details);

        let mut delivered = false;
        if images.len() >= 2 {
            match channel.send_media_group(&caption, &images).await {
                Ok(()) => delivered = true,
                Err(err) => warn!(
                    scene = %details.display_id,
                    "media group failed, falling back to single photo: {err}"
                ),
            }
        }
        if !delivered {
            if let Some(first) = images.first() {
                match channel.send_photo(&caption, first).await {
                    Ok(()) => delivered = true,
                    Err(err) => warn!(
                        scene = %details.display_id,
                        "photo failed, falling back to text: {err}"
                    ),
                }
            }
        }
        if !delivered {
            if let Err(err) = channel.send_text(&caption).await {
                warn!(
                    scene = %details.display_id,
                    "all delivery levels exhausted: {err}"
                );
            }
        }
    }

    async fn enrich(&self, scene: &NewScene) -> (SceneDetails, Vec<SceneImage>) {
        let spec = self.datasets.get(&scene.dataset);
        let mut details = SceneDetails::from_record(&scene.record, &scene.dataset, spec);

        if let Some(bbox) = &details.bbox {
            details.location = self.enricher.locate(bbox).await;
        }
        let images = self.enricher.images(&details).await;
        (details, images)
    }
}

/// Caption for a rich per-scene message, in Telegram HTML.
fn rich_caption(details: &SceneDetails) -> String {
    let mut lines = vec![format!("<b>{}</b>", details.display_id), String::new()];

    if let Some(location) = &details.location {
        lines.push(format!("<b>Location:</b> {location}"));
    }
    lines.push(format!(
        "<b>Date:</b> {}",
        details.acquisition_date.as_deref().unwrap_or("Unknown")
    ));
    if let Some(satellite) = &details.satellite {
        lines.push(format!("<b>Satellite:</b> {satellite}"));
    }
    lines.push(format!(
        "<b>Mission:</b> {}",
        details.mission.as_deref().unwrap_or("Unknown")
    ));
    lines.push(format!(
        "<b>Frame:</b> {}",
        details.frame.as_deref().unwrap_or("Unknown")
    ));
    if let Some(camera) = &details.camera_type {
        lines.push(format!("<b>Camera:</b> {camera}"));
    }
    if let Some(resolution) = &details.camera_resolution {
        lines.push(format!("<b>Resolution:</b> {resolution}"));
    }

    lines.push(String::new());
    lines.push(format!(
        "<a href=\"{}\">View on EarthExplorer</a>",
        details.metadata_url
    ));
    lines.join("\n")
}

/// Dataset-grouped summary for plain channels: up to three examples per
/// dataset and an "and N more" suffix for larger groups.
fn summary_message(scenes: &[NewScene]) -> String {
    let mut by_dataset: BTreeMap<&str, Vec<&NewScene>> = BTreeMap::new();
    for scene in scenes {
        by_dataset.entry(&scene.dataset).or_default().push(scene);
    }

    let mut lines = vec![format!(
        "{} new declassified scenes available!",
        scenes.len()
    )];

    for (dataset, group) in &by_dataset {
        lines.push(String::new());
        lines.push(format!("<b>{}</b>: {} scenes", dataset, group.len()));
        for scene in group.iter().take(SUMMARY_EXAMPLES) {
            let date = scene
                .record
                .acquisition_date()
                .unwrap_or_else(|| "unknown date".to_string());
            lines.push(format!("  - {} ({})", scene.record.label(), date));
        }
        if group.len() > SUMMARY_EXAMPLES {
            lines.push(format!("  ... and {} more", group.len() - SUMMARY_EXAMPLES));
        }
    }
    lines.join("\n")
}
