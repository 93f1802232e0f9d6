//! Reconciliation and backfill behavior against a canned catalog.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keyhole_core::audit::AuditLog;
use keyhole_core::client::{CatalogSource, ClientError};
use keyhole_core::config::DatasetSpec;
use keyhole_core::enrich::{Enricher, SceneDetails, SceneImage};
use keyhole_core::notify::Dispatcher;
use keyhole_core::reconcile::Reconciler;
use keyhole_core::scene::{BoundingBox, NewScene, SceneRecord};
use keyhole_core::seed::BackfillSeeder;
use keyhole_core::store::CatalogStore;
use serde_json::json;

fn record(entity_id: &str) -> SceneRecord {
    serde_json::from_value(json!({
        "entityId": entity_id,
        "displayId": format!("DS-{entity_id}"),
        "temporalCoverage": {"startDate": "1968-04-01 00:00:00"},
    }))
    .unwrap()
}

fn spec(name: &str) -> DatasetSpec {
    DatasetSpec {
        name: name.to_string(),
        availability_filter_id: "filter".to_string(),
        catalog_id: "catalog".to_string(),
    }
}

/// In-memory stand-in for the M2M API: a fixed catalog, a mutable set of
/// ids currently flagged available, and an optional injected failure for
/// the unfiltered (backfill) walk.
struct FakeCatalog {
    all: Vec<SceneRecord>,
    available: Mutex<HashSet<String>>,
    page_size: u64,
    fail_unfiltered_from: Mutex<Option<u64>>,
}

impl FakeCatalog {
    fn new(all_ids: &[&str], available_ids: &[&str], page_size: u64) -> Self {
        Self {
            all: all_ids.iter().map(|id| record(id)).collect(),
            available: Mutex::new(available_ids.iter().map(|s| s.to_string()).collect()),
            page_size,
            fail_unfiltered_from: Mutex::new(None),
        }
    }

    fn make_available(&self, entity_id: &str) {
        self.available
            .lock()
            .unwrap()
            .insert(entity_id.to_string());
    }

    /// Fail unfiltered pages at or beyond this starting number.
    fn fail_unfiltered_from(&self, starting_number: Option<u64>) {
        *self.fail_unfiltered_from.lock().unwrap() = starting_number;
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn scene_page(
        &self,
        _dataset: &str,
        starting_number: u64,
        filter_id: Option<&str>,
    ) -> Result<Vec<SceneRecord>, ClientError> {
        if filter_id.is_none() {
            if let Some(from) = *self.fail_unfiltered_from.lock().unwrap() {
                if starting_number >= from {
                    return Err(ClientError::Transient("connection reset".to_string()));
                }
            }
        }

        let available = self.available.lock().unwrap();
        let matching: Vec<SceneRecord> = self
            .all
            .iter()
            .filter(|s| filter_id.is_none() || available.contains(&s.entity_id))
            .cloned()
            .collect();
        let start = (starting_number as usize).saturating_sub(1);
        Ok(matching
            .into_iter()
            .skip(start)
            .take(self.page_size as usize)
            .collect())
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }
}

#[tokio::test]
async fn first_cycle_classifies_and_backfills() {
    let catalog = FakeCatalog::new(&["A", "B", "C", "U1", "U2"], &["A", "B", "C"], 2);
    let store = CatalogStore::open_in_memory().await.unwrap();
    let reconciler = Reconciler::new(&catalog, &store);

    let outcome = reconciler
        .reconcile_dataset(&spec("corona2"), true)
        .await
        .unwrap();

    let new_ids: HashSet<&str> = outcome
        .newly_available
        .iter()
        .map(|s| s.entity_id.as_str())
        .collect();
    assert_eq!(new_ids, HashSet::from(["A", "B", "C"]));
    assert_eq!(outcome.newly_digitized, 0);
    assert_eq!(outcome.backfill_added, Some(2));

    assert_eq!(store.known_ids("corona2").await.unwrap().len(), 5);
    let unscanned = store.unavailable_ids("corona2").await.unwrap();
    assert_eq!(
        unscanned,
        HashSet::from(["U1".to_string(), "U2".to_string()])
    );
    for id in ["A", "B", "C"] {
        assert_eq!(store.scene_state(id).await.unwrap(), Some((true, false)));
    }
}

#[tokio::test]
async fn unchanged_second_cycle_classifies_nothing() {
    let catalog = FakeCatalog::new(&["A", "B", "U1"], &["A", "B"], 2);
    let store = CatalogStore::open_in_memory().await.unwrap();
    let reconciler = Reconciler::new(&catalog, &store);

    reconciler
        .reconcile_dataset(&spec("corona2"), true)
        .await
        .unwrap();
    let second = reconciler
        .reconcile_dataset(&spec("corona2"), false)
        .await
        .unwrap();

    assert!(second.newly_available.is_empty());
    assert_eq!(second.newly_digitized, 0);
    assert_eq!(second.backfill_added, None);
}

#[tokio::test]
async fn digitized_placeholder_transitions_without_notification() {
    let catalog = FakeCatalog::new(&["A", "U1", "U2"], &["A"], 2);
    let store = CatalogStore::open_in_memory().await.unwrap();
    let reconciler = Reconciler::new(&catalog, &store);

    reconciler
        .reconcile_dataset(&spec("corona2"), true)
        .await
        .unwrap();

    // The service digitizes U1 between cycles.
    catalog.make_available("U1");
    let outcome = reconciler
        .reconcile_dataset(&spec("corona2"), false)
        .await
        .unwrap();

    // Transitioned, recorded, but deliberately not handed on for
    // notification.
    assert!(outcome.newly_available.is_empty());
    assert_eq!(outcome.newly_digitized, 1);
    assert_eq!(store.scene_state("U1").await.unwrap(), Some((true, false)));
    assert_eq!(
        store.unavailable_ids("corona2").await.unwrap(),
        HashSet::from(["U2".to_string()])
    );
}

#[tokio::test]
async fn backfill_excludes_known_and_current_poll() {
    let catalog = FakeCatalog::new(&["A", "K", "U1"], &["A"], 2);
    let store = CatalogStore::open_in_memory().await.unwrap();

    // K was recorded by an earlier cycle.
    store
        .upsert_scenes(&[record("K")], "corona2", true)
        .await
        .unwrap();

    let reconciler = Reconciler::new(&catalog, &store);
    let outcome = reconciler
        .reconcile_dataset(&spec("corona2"), true)
        .await
        .unwrap();

    // Only U1 needs a placeholder: A was classified this cycle, K before.
    assert_eq!(outcome.backfill_added, Some(1));
    assert_eq!(
        store.unavailable_ids("corona2").await.unwrap(),
        HashSet::from(["U1".to_string()])
    );
}

/// Enricher that never finds anything; dispatch without a rich channel never
/// calls it anyway.
struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn locate(&self, _bbox: &BoundingBox) -> Option<String> {
        None
    }

    async fn images(&self, _details: &SceneDetails) -> Vec<SceneImage> {
        Vec::new()
    }
}

#[tokio::test]
async fn full_cycle_records_dispatches_and_marks_notified() {
    let catalog = FakeCatalog::new(&["X", "Y", "Z"], &["X", "Y", "Z"], 2);
    let store = CatalogStore::open_in_memory().await.unwrap();
    let reconciler = Reconciler::new(&catalog, &store);
    let spec = spec("corona2");

    let outcome = reconciler.reconcile_dataset(&spec, true).await.unwrap();
    for id in ["X", "Y", "Z"] {
        assert_eq!(store.scene_state(id).await.unwrap(), Some((true, false)));
    }

    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("new_scenes.txt");
    let dispatcher = Dispatcher::new(
        None,
        Vec::new(),
        Arc::new(NoopEnricher),
        AuditLog::new(audit_path.clone()),
        HashMap::from([(spec.name.clone(), spec.clone())]),
        20,
        Duration::ZERO,
    );
    let new_scenes: Vec<NewScene> = outcome
        .newly_available
        .into_iter()
        .map(|record| NewScene {
            dataset: spec.name.clone(),
            record,
        })
        .collect();
    dispatcher.dispatch(&new_scenes, &store).await.unwrap();

    for id in ["X", "Y", "Z"] {
        assert_eq!(store.scene_state(id).await.unwrap(), Some((true, true)));
    }
    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert!(audit.contains("# 3 scenes"));
    assert_eq!(
        audit
            .lines()
            .filter(|line| line.starts_with("https://earthexplorer.usgs.gov/"))
            .count(),
        3
    );
}

#[tokio::test]
async fn interrupted_backfill_resumes_at_cursor() {
    let ids: Vec<String> = (1..=13).map(|i| format!("U{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    // Page size 2, flush window 5 pages: the first ten records flush and
    // the cursor lands on 11 before the failure at page six.
    let catalog = FakeCatalog::new(&id_refs, &[], 2);
    catalog.fail_unfiltered_from(Some(11));

    let store = CatalogStore::open_in_memory().await.unwrap();
    let seeder = BackfillSeeder::new(&catalog, &store);
    let none = HashSet::new();

    let err = seeder
        .seed_dataset("corona2", &none, &none)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(store.get_seed_cursor("corona2").await.unwrap(), 11);
    assert_eq!(store.unavailable_ids("corona2").await.unwrap().len(), 10);

    // Next run picks up from the persisted cursor and completes.
    catalog.fail_unfiltered_from(None);
    let added = seeder.seed_dataset("corona2", &none, &none).await.unwrap();
    assert_eq!(added, 3);
    assert_eq!(store.get_seed_cursor("corona2").await.unwrap(), 1);

    // The resumed walk converges on the same state as an uninterrupted one.
    let fresh_store = CatalogStore::open_in_memory().await.unwrap();
    let fresh_seeder = BackfillSeeder::new(&catalog, &fresh_store);
    fresh_seeder
        .seed_dataset("corona2", &none, &none)
        .await
        .unwrap();
    assert_eq!(
        store.unavailable_ids("corona2").await.unwrap(),
        fresh_store.unavailable_ids("corona2").await.unwrap()
    );
    assert_eq!(store.unavailable_ids("corona2").await.unwrap().len(), 13);
}
