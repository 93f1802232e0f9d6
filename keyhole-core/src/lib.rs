//! # Keyhole Core
//!
//! Change detection and notification pipeline for the USGS declassified
//! imagery catalogs (CORONA, GAMBIT, HEXAGON).
//!
//! Each scheduled run polls the M2M API for scenes currently available for
//! download, diffs them against a durable SQLite catalog of everything seen
//! before, and notifies configured channels about genuinely new scenes. A
//! one-time resumable backfill records the rest of the catalog as
//! "unscanned" placeholders so later digitization events can be told apart
//! from scenes we simply never tracked.
//!
//! Modules, roughly in pipeline order:
//!
//! - [`client`]: resilient M2M API client with retry/backoff
//! - [`store`]: durable scene/meta store
//! - [`seed`]: resumable full-catalog backfill
//! - [`reconcile`]: per-cycle classification of fetched scenes
//! - [`enrich`]: best-effort geocoding and browse imagery
//! - [`notify`]: dispatcher, channels, and the content fallback chain
//! - [`audit`]: append-only record of every detection
//! - [`monitor`]: one full run, wired together

pub mod audit;
pub mod client;
pub mod config;
pub mod enrich;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod reconcile;
pub mod scene;
pub mod seed;
pub mod store;

pub use client::{CatalogSource, ClientError, M2mClient};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use scene::{NewScene, SceneRecord};
pub use store::CatalogStore;
