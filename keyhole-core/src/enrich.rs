//! Best-effort notification enrichment: reverse geocoding and browse-image
//! fetching. Nothing here can fail the pipeline; every miss degrades to an
//! omitted field.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DatasetSpec;
use crate::scene::{self, BoundingBox, SceneRecord};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const USER_AGENT: &str = "keyhole-monitor/0.1";
const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything smaller is an error page or a placeholder, not an image.
const MIN_IMAGE_BYTES: usize = 100;

/// An image ready to attach to a rich notification.
#[derive(Debug, Clone)]
pub struct SceneImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Everything a rich notification says about one scene. Built from the
/// record itself plus whatever enrichment succeeded.
#[derive(Debug, Clone)]
pub struct SceneDetails {
    pub display_id: String,
    pub acquisition_date: Option<String>,
    pub location: Option<String>,
    pub satellite: Option<String>,
    pub mission: Option<String>,
    pub frame: Option<String>,
    pub camera_type: Option<String>,
    pub camera_resolution: Option<String>,
    pub browse_url: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub metadata_url: String,
}

impl SceneDetails {
    pub fn from_record(record: &SceneRecord, dataset: &str, spec: Option<&DatasetSpec>) -> Self {
        let display_id = record.label().to_string();
        let mission = record.metadata_field("Mission");
        let satellite = mission
            .as_deref()
            .and_then(|m| scene::satellite_type(m, dataset))
            .map(str::to_string);
        let catalog_id = spec.map(|s| s.catalog_id.as_str()).unwrap_or("");

        Self {
            metadata_url: scene::metadata_url(catalog_id, &display_id),
            acquisition_date: record.acquisition_date(),
            location: None,
            satellite,
            mission,
            frame: record.metadata_field("Frame"),
            camera_type: record.metadata_field("Camera Type"),
            camera_resolution: record.metadata_field("Camera Resolution"),
            browse_url: record.browse_url(),
            bbox: record.bounding_box(),
            display_id,
        }
    }
}

/// Enrichment port. The HTTP implementation talks to Nominatim and the USGS
/// browse servers; tests plug in a stub.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Human-readable region for a bounding box, or `None`.
    async fn locate(&self, bbox: &BoundingBox) -> Option<String>;

    /// Every image worth attaching to this scene's notification. Empty when
    /// nothing could be fetched.
    async fn images(&self, details: &SceneDetails) -> Vec<SceneImage>;
}

#[derive(Debug, Clone)]
pub struct HttpEnricher {
    http: reqwest::Client,
}

impl HttpEnricher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(IMAGE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { http }
    }
}

impl Default for HttpEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize, Default)]
struct NominatimResponse {
    #[serde(default)]
    address: NominatimAddress,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize, Default)]
struct NominatimAddress {
    state: Option<String>,
    region: Option<String>,
    province: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn locate(&self, bbox: &BoundingBox) -> Option<String> {
        let (lat, lon) = bbox.centroid();
        let response = self
            .http
            .get(NOMINATIM_URL)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                // Country/state level detail is enough for a caption.
                ("zoom", "5".to_string()),
                ("accept-language", "en".to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let body: NominatimResponse = match response {
            Ok(response) => match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    debug!("reverse geocoding decode failed: {err}");
                    return None;
                }
            },
            Err(err) => {
                debug!("reverse geocoding failed: {err}");
                return None;
            }
        };

        let address = body.address;
        let region = address
            .state
            .or(address.region)
            .or(address.province)
            .or(address.county);
        let parts: Vec<String> = [region, address.country].into_iter().flatten().collect();
        if !parts.is_empty() {
            return Some(parts.join(", "));
        }

        // No structured address; settle for the tail of the display name,
        // which is usually "region, country".
        let components: Vec<&str> = body
            .display_name
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        match components.len() {
            0 => None,
            1 => Some(components[0].to_string()),
            n => Some(components[n - 2..].join(", ")),
        }
    }

    async fn images(&self, details: &SceneDetails) -> Vec<SceneImage> {
        let Some(url) = details.browse_url.as_deref() else {
            return Vec::new();
        };
        match self.fetch_image(url).await {
            Some(bytes) => vec![SceneImage {
                filename: "image.jpg".to_string(),
                bytes,
            }],
            None => Vec::new(),
        }
    }
}

impl HttpEnricher {
    /// Download one image, rejecting obvious non-images and normalizing the
    /// rest for messaging.
    async fn fetch_image(&self, url: &str) -> Option<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let bytes = match response {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(err) => {
                    warn!(url, "failed to read image body: {err}");
                    return None;
                }
            },
            Err(err) => {
                warn!(url, "failed to download image: {err}");
                return None;
            }
        };
        if bytes.len() < MIN_IMAGE_BYTES {
            debug!(url, len = bytes.len(), "discarding implausibly small image");
            return None;
        }
        Some(normalize_for_messaging(bytes))
    }
}

/// Bring an image within Telegram photo limits: aspect ratio at most 20:1
/// (center crop) and width + height at most 10,000 px. Images already within
/// limits, and anything that fails to decode, pass through untouched.
fn normalize_for_messaging(data: Vec<u8>) -> Vec<u8> {
    let image = match image::load_from_memory(&data) {
        Ok(image) => image,
        Err(_) => return data,
    };
    let (width, height) = (image.width(), image.height());
    let aspect = f64::from(width.max(height)) / f64::from(width.min(height).max(1));

    let mut image = image;
    let mut changed = false;

    if aspect > 20.0 {
        let (new_width, new_height) = if width > height {
            (height.saturating_mul(20), height)
        } else {
            (width, width.saturating_mul(20))
        };
        let left = (width - new_width) / 2;
        let top = (height - new_height) / 2;
        image = image.crop_imm(left, top, new_width, new_height);
        changed = true;
    }

    if image.width() + image.height() > 10_000 {
        let scale = 10_000.0 / f64::from(image.width() + image.height());
        let new_width = ((f64::from(image.width()) * scale) as u32).max(1);
        let new_height = ((f64::from(image.height()) * scale) as u32).max(1);
        image = image.thumbnail(new_width, new_height);
        changed = true;
    }

    if !changed {
        return data;
    }

    let mut out = Cursor::new(Vec::new());
    let rgb = image::DynamicImage::ImageRgb8(image.to_rgb8());
    match rgb.write_to(&mut out, image::ImageFormat::Jpeg) {
        Ok(()) => out.into_inner(),
        Err(_) => data,
    }
}
