//! Per-cycle reconciliation of remote catalog state against the store.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::client::CatalogSource;
use crate::config::DatasetSpec;
use crate::error::Result;
use crate::scene::SceneRecord;
use crate::seed::BackfillSeeder;
use crate::store::CatalogStore;

/// Safety cap on the incremental poll; the declassified collections are two
/// orders of magnitude below this.
const MAX_AVAILABLE_RESULTS: usize = 500_000;

/// What one dataset's cycle produced.
#[derive(Debug)]
pub struct DatasetOutcome {
    pub dataset: String,
    /// Scenes currently flagged available by the remote service.
    pub fetched: usize,
    /// Never-before-seen scenes, observed directly as available. These are
    /// the only scenes handed onward for notification.
    pub newly_available: Vec<SceneRecord>,
    /// Previously-unscanned placeholders that flipped to available this
    /// cycle. Recorded silently: catalog bookkeeping, not news.
    pub newly_digitized: usize,
    /// Placeholders added by the one-time backfill, when it ran.
    pub backfill_added: Option<u64>,
}

pub struct Reconciler<'a> {
    source: &'a dyn CatalogSource,
    store: &'a CatalogStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(source: &'a dyn CatalogSource, store: &'a CatalogStore) -> Self {
        Self { source, store }
    }

    /// Run one reconciliation cycle for a dataset. `run_backfill` is true
    /// until the global one-time seed has completed.
    pub async fn reconcile_dataset(
        &self,
        spec: &DatasetSpec,
        run_backfill: bool,
    ) -> Result<DatasetOutcome> {
        let dataset = spec.name.as_str();
        let known_ids = self.store.known_ids(dataset).await?;
        info!(dataset, known = known_ids.len(), "reconciling dataset");

        let fetched = self
            .fetch_available(dataset, &spec.availability_filter_id)
            .await?;
        let available_ids: HashSet<String> =
            fetched.iter().map(|s| s.entity_id.clone()).collect();

        // First-ever sightings, already available.
        let newly_available: Vec<SceneRecord> = fetched
            .iter()
            .filter(|s| !known_ids.contains(&s.entity_id))
            .cloned()
            .collect();
        if !newly_available.is_empty() {
            info!(dataset, count = newly_available.len(), "new available scenes");
            self.store
                .upsert_scenes(&newly_available, dataset, true)
                .await?;
        }

        // Unscanned placeholders the service has digitized since last cycle.
        let unavailable_ids = self.store.unavailable_ids(dataset).await?;
        let newly_digitized: Vec<String> = available_ids
            .intersection(&unavailable_ids)
            .cloned()
            .collect();
        if !newly_digitized.is_empty() {
            info!(
                dataset,
                count = newly_digitized.len(),
                "previously unscanned scenes are now available"
            );
            self.store.mark_available(&newly_digitized).await?;
        }

        // The exclusion sets keep the seeder from re-adding anything this
        // cycle already classified.
        let backfill_added = if run_backfill {
            let seeder = BackfillSeeder::new(self.source, self.store);
            Some(
                seeder
                    .seed_dataset(dataset, &known_ids, &available_ids)
                    .await?,
            )
        } else {
            None
        };

        Ok(DatasetOutcome {
            dataset: dataset.to_string(),
            fetched: fetched.len(),
            newly_available,
            newly_digitized: newly_digitized.len(),
            backfill_added,
        })
    }

    /// Fetch every record currently flagged available, fully paginated.
    async fn fetch_available(
        &self,
        dataset: &str,
        filter_id: &str,
    ) -> Result<Vec<SceneRecord>> {
        let page_size = self.source.page_size();
        let mut all = Vec::new();
        let mut starting_number = 1;

        loop {
            let page = self
                .source
                .scene_page(dataset, starting_number, Some(filter_id))
                .await?;
            let page_len = page.len() as u64;
            all.extend(page);

            if page_len < page_size {
                break;
            }
            if all.len() >= MAX_AVAILABLE_RESULTS {
                warn!(dataset, fetched = all.len(), "hit available-results cap");
                break;
            }
            starting_number += page_size;
        }

        info!(dataset, available = all.len(), "fetched available scenes");
        Ok(all)
    }
}
