//! Runtime configuration for the monitor.
//!
//! Everything the pipeline needs is carried explicitly in [`MonitorConfig`];
//! there is no global state. The file format is plain JSON so an existing
//! `config.json` keeps working unchanged.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub usgs: UsgsConfig,

    /// Path of the SQLite catalog store.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Append-only audit file receiving one entry per newly-available scene.
    #[serde(default = "default_audit_file")]
    pub metadata_urls_file: PathBuf,

    /// Datasets to reconcile, in order. Defaults to the three declassified
    /// imagery collections.
    #[serde(default = "DatasetSpec::defaults")]
    pub datasets: Vec<DatasetSpec>,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Credentials for the USGS M2M API. `token` is an application token
/// generated on the EarthExplorer profile page, not the account password.
#[derive(Debug, Clone, Deserialize)]
pub struct UsgsConfig {
    pub username: String,
    pub token: String,
}

/// One sub-catalog of the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSpec {
    /// Dataset name as the M2M API knows it (e.g. "corona2").
    pub name: String,
    /// Metadata filter id selecting the "Download Available = Y" field.
    pub availability_filter_id: String,
    /// Catalog id used when building EarthExplorer metadata page URLs.
    pub catalog_id: String,
}

impl DatasetSpec {
    pub fn defaults() -> Vec<DatasetSpec> {
        vec![
            // Declass 1: CORONA, ARGON, LANYARD (KH-1 to KH-6), 1960-1972
            DatasetSpec {
                name: "corona2".to_string(),
                availability_filter_id: "5e839feb64cee663".to_string(),
                catalog_id: "5e839febdccb64b3".to_string(),
            },
            // Declass 2: KH-7 and KH-9 Mapping Camera, 1963-1980
            DatasetSpec {
                name: "declassii".to_string(),
                availability_filter_id: "5e839ff8ba6eead0".to_string(),
                catalog_id: "5e839ff7d71d4811".to_string(),
            },
            // Declass 3: KH-9 Hexagon Panoramic, 1971-1984
            DatasetSpec {
                name: "declassiii".to_string(),
                availability_filter_id: "5e7c41f38f5a8fa1".to_string(),
                catalog_id: "5e7c41f3ffaaf662".to_string(),
            },
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ntfy: NtfyConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// At or below this many new scenes, each one gets its own rich message;
    /// above it the dispatcher falls back to a single summary.
    #[serde(default = "default_max_individual")]
    pub max_individual_messages: usize,
    /// Pause between consecutive rich sends.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            max_individual_messages: default_max_individual(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NtfyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_ntfy_server")]
    pub server: String,
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: String::new(),
            server: default_ntfy_server(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
}

fn default_database() -> PathBuf {
    PathBuf::from("scenes.db")
}

fn default_audit_file() -> PathBuf {
    PathBuf::from("new_scenes.txt")
}

fn default_max_individual() -> usize {
    20
}

fn default_send_delay_ms() -> u64 {
    500
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}
