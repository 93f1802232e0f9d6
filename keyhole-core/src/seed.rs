//! One-time, resumable backfill of the full unfiltered catalog.
//!
//! The incremental poll only ever sees records that are already available.
//! Seeding writes an `available = 0` placeholder for every other record in
//! the catalog, which is what lets a later cycle tell "this scene just got
//! digitized" apart from "we only just started tracking this scene".

use std::collections::HashSet;
use std::time::Duration;

use tracing::info;

use crate::client::CatalogSource;
use crate::error::Result;
use crate::scene::SceneRecord;
use crate::store::CatalogStore;

/// Flush buffered placeholders and persist the cursor every this many pages,
/// so a crash loses at most one flush window of work.
const FLUSH_EVERY_PAGES: u64 = 5;

/// Pause between unfiltered pages; the full walk is tens of requests and
/// there is no reason to hammer the API.
const PAGE_DELAY: Duration = Duration::from_millis(500);

pub struct BackfillSeeder<'a> {
    source: &'a dyn CatalogSource,
    store: &'a CatalogStore,
}

impl<'a> BackfillSeeder<'a> {
    pub fn new(source: &'a dyn CatalogSource, store: &'a CatalogStore) -> Self {
        Self { source, store }
    }

    /// Walk the entire catalog for `dataset` and persist every record not in
    /// `known_ids` or `available_ids` as an unscanned placeholder. Resumes
    /// from the persisted cursor when a previous walk was interrupted.
    /// Returns the number of placeholders added this run.
    pub async fn seed_dataset(
        &self,
        dataset: &str,
        known_ids: &HashSet<String>,
        available_ids: &HashSet<String>,
    ) -> Result<u64> {
        let page_size = self.source.page_size();
        let mut starting_number = self.store.get_seed_cursor(dataset).await?;
        if starting_number > 1 {
            info!(dataset, starting_number, "resuming interrupted backfill");
        } else {
            info!(dataset, "starting full-catalog backfill");
        }

        let mut pending: Vec<SceneRecord> = Vec::new();
        let mut pages_since_flush = 0;
        let mut added_total = 0;

        loop {
            let page = self
                .source
                .scene_page(dataset, starting_number, None)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len() as u64;

            pending.extend(page.into_iter().filter(|scene| {
                !known_ids.contains(&scene.entity_id)
                    && !available_ids.contains(&scene.entity_id)
            }));
            starting_number += page_size;
            pages_since_flush += 1;

            if pages_since_flush >= FLUSH_EVERY_PAGES {
                added_total += self.flush(dataset, &mut pending).await?;
                self.store
                    .save_seed_cursor(dataset, starting_number)
                    .await?;
                pages_since_flush = 0;
                info!(dataset, added_total, "backfill progress flushed");
            }

            if page_len < page_size {
                break;
            }
            tokio::time::sleep(PAGE_DELAY).await;
        }

        added_total += self.flush(dataset, &mut pending).await?;
        self.store.clear_seed_cursor(dataset).await?;
        info!(dataset, added_total, "backfill complete");
        Ok(added_total)
    }

    async fn flush(&self, dataset: &str, pending: &mut Vec<SceneRecord>) -> Result<u64> {
        if pending.is_empty() {
            return Ok(0);
        }
        let added = self
            .store
            .upsert_scenes(pending, dataset, false)
            .await?;
        pending.clear();
        Ok(added)
    }
}
