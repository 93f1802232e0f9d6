//! Wire types for M2M `scene-search` results and the metadata extraction
//! helpers the dispatcher builds captions from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One catalog record as returned by `scene-search`. Only the fields the
/// pipeline consumes are modeled; everything else is dropped on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    pub entity_id: String,
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub temporal_coverage: Option<TemporalCoverage>,
    #[serde(default)]
    pub spatial_bounds: Option<Value>,
    #[serde(default)]
    pub spatial_coverage: Option<Value>,
    #[serde(default)]
    pub browse: Vec<BrowseEntry>,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalCoverage {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseEntry {
    #[serde(default)]
    pub browse_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataField {
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// A newly-available scene tagged with the dataset it came from, as handed
/// from the reconciler to the dispatcher.
#[derive(Debug, Clone)]
pub struct NewScene {
    pub dataset: String,
    pub record: SceneRecord,
}

/// Axis-aligned bounding box in lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }
}

impl SceneRecord {
    /// Acquisition date, as a bare ISO date. Prefers the temporal coverage
    /// start, falling back to the publish date.
    pub fn acquisition_date(&self) -> Option<String> {
        self.temporal_coverage
            .as_ref()
            .and_then(|t| t.start_date.as_deref())
            .or(self.publish_date.as_deref())
            .map(date_part)
    }

    /// Publish date with any time-of-day suffix stripped.
    pub fn publish_day(&self) -> Option<String> {
        self.publish_date.as_deref().map(date_part)
    }

    /// Browse image URL, preferring the full-size path over the thumbnail.
    pub fn browse_url(&self) -> Option<String> {
        self.browse.first().and_then(|entry| {
            entry
                .browse_path
                .clone()
                .or_else(|| entry.thumbnail_path.clone())
        })
    }

    /// Serialized GeoJSON footprint for storage, if the record carries one.
    pub fn geometry_json(&self) -> Option<String> {
        [&self.spatial_coverage, &self.spatial_bounds]
            .into_iter()
            .flatten()
            .find(|geom| geom.get("type").is_some())
            .map(|geom| geom.to_string())
    }

    /// Bounding box of the first polygon ring in `spatialBounds`.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let ring = self
            .spatial_bounds
            .as_ref()?
            .get("coordinates")?
            .get(0)?
            .as_array()?;

        let mut lons = Vec::with_capacity(ring.len());
        let mut lats = Vec::with_capacity(ring.len());
        for point in ring {
            let point = point.as_array()?;
            lons.push(point.first()?.as_f64()?);
            lats.push(point.get(1)?.as_f64()?);
        }
        if lons.is_empty() {
            return None;
        }

        let fold = |values: &[f64], pick: fn(f64, f64) -> f64| {
            values.iter().copied().reduce(pick).unwrap_or(0.0)
        };
        Some(BoundingBox {
            west: fold(&lons, f64::min),
            east: fold(&lons, f64::max),
            south: fold(&lats, f64::min),
            north: fold(&lats, f64::max),
        })
    }

    /// Value of a named entry in the metadata field list.
    pub fn metadata_field(&self, name: &str) -> Option<String> {
        self.metadata
            .iter()
            .find(|f| f.field_name.as_deref() == Some(name))
            .and_then(|f| f.value.as_ref())
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }

    /// Human label to show for this scene.
    pub fn label(&self) -> &str {
        self.display_id.as_deref().unwrap_or(&self.entity_id)
    }
}

/// EarthExplorer metadata page for a scene.
pub fn metadata_url(catalog_id: &str, display_id: &str) -> String {
    format!("https://earthexplorer.usgs.gov/scene/metadata/full/{catalog_id}/{display_id}/")
}

/// Classify the satellite system from the mission identifier.
///
/// Mission numbering per the USGS declassified collections: CORONA flights
/// run 9001-9058 and 1001-1117, ARGON reuses CORONA numbers with an `A`
/// suffix, LANYARD is 8001-8003, GAMBIT 4xxx, and HEXAGON 12xx.
pub fn satellite_type(mission: &str, dataset: &str) -> Option<&'static str> {
    let mission = mission.split('-').next().unwrap_or(mission);
    let is_argon = mission.ends_with('A');
    let digits = if is_argon {
        &mission[..mission.len() - 1]
    } else {
        mission
    };
    let number: u32 = digits.parse().ok()?;

    match dataset {
        "corona2" => {
            if is_argon {
                return Some("KH-5 (ARGON)");
            }
            match number {
                8001..=8003 => Some("KH-6 (LANYARD)"),
                9001..=9009 => Some("KH-1"),
                9010..=9015 => Some("KH-2"),
                9016..=9024 => Some("KH-3"),
                9025..=9058 => Some("KH-4"),
                1001..=1052 => Some("KH-4A"),
                1101..=1117 => Some("KH-4B"),
                _ => None,
            }
        }
        "declassii" => match number {
            4000..=4999 => Some("KH-7 (GAMBIT)"),
            1200..=1299 => Some("KH-9 (HEXAGON)"),
            _ => Some("KH-7/KH-9"),
        },
        "declassiii" => Some("KH-9 (HEXAGON)"),
        _ => None,
    }
}

fn date_part(raw: &str) -> String {
    // "1972-05-31 00:00:00-05" -> "1972-05-31"
    raw.split(' ').next().unwrap_or(raw).to_string()
}
