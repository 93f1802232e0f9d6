//! Top-level run orchestration: one scheduled reconciliation cycle across
//! all configured datasets, followed by notification dispatch.

use tracing::{error, info};

use crate::client::{CatalogSource, M2mClient};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::notify::Dispatcher;
use crate::reconcile::{DatasetOutcome, Reconciler};
use crate::scene::NewScene;
use crate::store::CatalogStore;

/// Per-run statistics, logged at the end of every cycle.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub datasets_processed: usize,
    pub datasets_failed: usize,
    pub new_scenes: usize,
    pub newly_digitized: usize,
}

/// Run one full monitoring cycle. Logs in, reconciles each dataset in
/// order (a dataset's failure never blocks the others), dispatches
/// notifications for the combined newly-available set, and logs out.
///
/// Fails only when authentication fails or every dataset failed; partial
/// failures are logged and the run completes.
pub async fn run(config: &MonitorConfig) -> Result<RunSummary> {
    let store = CatalogStore::open(&config.database).await?;
    let client = M2mClient::new(&config.usgs);

    client.login().await?;
    let result = run_cycle(&client, &store, config).await;

    // Best-effort: a logout failure must not mask the cycle's outcome.
    if let Err(err) = client.logout().await {
        error!("logout failed: {err}");
    }
    result
}

async fn run_cycle(
    source: &dyn CatalogSource,
    store: &CatalogStore,
    config: &MonitorConfig,
) -> Result<RunSummary> {
    let seeded = store.is_seeded().await?;
    if !seeded {
        info!("first run: backfilling full catalogs alongside the poll, this will take a while");
    }

    let reconciler = Reconciler::new(source, store);
    let mut summary = RunSummary::default();
    let mut new_scenes: Vec<NewScene> = Vec::new();

    for spec in &config.datasets {
        match reconciler.reconcile_dataset(spec, !seeded).await {
            Ok(outcome) => {
                summary.datasets_processed += 1;
                summary.new_scenes += outcome.newly_available.len();
                summary.newly_digitized += outcome.newly_digitized;
                log_outcome(&outcome);
                new_scenes.extend(outcome.newly_available.into_iter().map(|record| NewScene {
                    dataset: spec.name.clone(),
                    record,
                }));
            }
            Err(err) => {
                summary.datasets_failed += 1;
                error!(dataset = %spec.name, "dataset cycle failed: {err}");
            }
        }
    }

    // The global flag flips only once every dataset has completed its
    // one-time backfill; a partial run retries the failed ones next cycle.
    if !seeded && summary.datasets_failed == 0 {
        store.mark_seeded().await?;
    }

    let dispatcher = Dispatcher::from_config(config);
    dispatcher.dispatch(&new_scenes, store).await?;

    for (dataset, count) in store.dataset_counts().await? {
        info!(dataset = %dataset, scenes = count, "store statistics");
    }

    if !config.datasets.is_empty() && summary.datasets_failed == config.datasets.len() {
        return Err(MonitorError::AllDatasetsFailed);
    }
    Ok(summary)
}

fn log_outcome(outcome: &DatasetOutcome) {
    info!(
        dataset = %outcome.dataset,
        available = outcome.fetched,
        new = outcome.newly_available.len(),
        digitized = outcome.newly_digitized,
        backfilled = outcome.backfill_added.unwrap_or(0),
        "dataset reconciled"
    );
}
