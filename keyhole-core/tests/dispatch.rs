//! Dispatcher behavior: fallback chain, volume threshold, audit trail and
//! notified bookkeeping, exercised through fake channels and a stub
//! enricher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keyhole_core::audit::AuditLog;
use keyhole_core::config::DatasetSpec;
use keyhole_core::enrich::{Enricher, SceneDetails, SceneImage};
use keyhole_core::notify::{ChannelError, Dispatcher, RichChannel, SummaryChannel};
use keyhole_core::scene::{BoundingBox, NewScene};
use keyhole_core::store::CatalogStore;
use serde_json::json;

fn new_scene(dataset: &str, entity_id: &str) -> NewScene {
    let record = serde_json::from_value(json!({
        "entityId": entity_id,
        "displayId": format!("DS-{entity_id}"),
        "temporalCoverage": {"startDate": "1968-04-01 00:00:00"},
    }))
    .unwrap();
    NewScene {
        dataset: dataset.to_string(),
        record,
    }
}

fn datasets() -> HashMap<String, DatasetSpec> {
    DatasetSpec::defaults()
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect()
}

fn rejected() -> ChannelError {
    ChannelError::Rejected {
        channel: "fake",
        detail: "declined".to_string(),
    }
}

/// Rich channel that records every call and fails on command.
#[derive(Default)]
struct RecordingRich {
    fail_media_group: bool,
    fail_photo: bool,
    fail_text: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingRich {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RichChannel for RecordingRich {
    async fn send_media_group(
        &self,
        _caption: &str,
        images: &[SceneImage],
    ) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("media_group:{}", images.len()));
        if self.fail_media_group {
            Err(rejected())
        } else {
            Ok(())
        }
    }

    async fn send_photo(&self, _caption: &str, _image: &SceneImage) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push("photo".to_string());
        if self.fail_photo {
            Err(rejected())
        } else {
            Ok(())
        }
    }

    async fn send_text(&self, _text: &str) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push("text".to_string());
        if self.fail_text {
            Err(rejected())
        } else {
            Ok(())
        }
    }
}

/// Summary channel that keeps every message it was handed.
struct RecordingSummary {
    label: &'static str,
    messages: Mutex<Vec<String>>,
}

impl RecordingSummary {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            messages: Mutex::new(Vec::new()),
        }
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummaryChannel for RecordingSummary {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn send_summary(&self, _title: &str, message: &str) -> Result<(), ChannelError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Enricher stub producing a fixed number of synthetic images.
struct StubEnricher {
    image_count: usize,
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn locate(&self, _bbox: &BoundingBox) -> Option<String> {
        Some("Kyzylorda, Kazakhstan".to_string())
    }

    async fn images(&self, _details: &SceneDetails) -> Vec<SceneImage> {
        (0..self.image_count)
            .map(|i| SceneImage {
                filename: format!("image{i}.jpg"),
                bytes: vec![0u8; 200],
            })
            .collect()
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    store: CatalogStore,
}

impl Fixture {
    async fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            store: CatalogStore::open_in_memory().await.unwrap(),
        }
    }

    fn audit(&self) -> AuditLog {
        AuditLog::new(self.dir.path().join("new_scenes.txt"))
    }

    fn audit_contents(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("new_scenes.txt")).unwrap()
    }

    /// Record scenes as freshly available, the state the reconciler leaves
    /// them in before dispatch.
    async fn seed_scenes(&self, scenes: &[NewScene]) {
        for scene in scenes {
            self.store
                .upsert_scenes(std::slice::from_ref(&scene.record), &scene.dataset, true)
                .await
                .unwrap();
        }
    }

    fn dispatcher(
        &self,
        rich: Option<Arc<dyn RichChannel>>,
        plain: Vec<Arc<dyn SummaryChannel>>,
        image_count: usize,
        max_individual: usize,
    ) -> Dispatcher {
        Dispatcher::new(
            rich,
            plain,
            Arc::new(StubEnricher { image_count }),
            self.audit(),
            datasets(),
            max_individual,
            Duration::from_millis(500),
        )
    }
}

#[tokio::test]
async fn media_group_is_preferred_with_multiple_images() {
    let fixture = Fixture::new().await;
    let scenes = vec![new_scene("corona2", "C1")];
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich::default());
    let dispatcher = fixture.dispatcher(Some(rich.clone()), Vec::new(), 2, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    assert_eq!(rich.calls(), vec!["media_group:2"]);
    assert_eq!(
        fixture.store.scene_state("C1").await.unwrap(),
        Some((true, true))
    );
}

#[tokio::test]
async fn delivery_degrades_through_photo_to_text() {
    let fixture = Fixture::new().await;
    let scenes = vec![new_scene("corona2", "C1")];
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich {
        fail_media_group: true,
        fail_photo: true,
        ..Default::default()
    });
    let dispatcher = fixture.dispatcher(Some(rich.clone()), Vec::new(), 2, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    assert_eq!(rich.calls(), vec!["media_group:2", "photo", "text"]);
}

#[tokio::test]
async fn single_image_skips_the_media_group_level() {
    let fixture = Fixture::new().await;
    let scenes = vec![new_scene("corona2", "C1")];
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich::default());
    let dispatcher = fixture.dispatcher(Some(rich.clone()), Vec::new(), 1, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    assert_eq!(rich.calls(), vec!["photo"]);
}

#[tokio::test]
async fn no_images_means_text_only() {
    let fixture = Fixture::new().await;
    let scenes = vec![new_scene("corona2", "C1")];
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich::default());
    let dispatcher = fixture.dispatcher(Some(rich.clone()), Vec::new(), 0, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    assert_eq!(rich.calls(), vec!["text"]);
}

#[tokio::test]
async fn exhausted_chain_still_marks_scenes_notified() {
    let fixture = Fixture::new().await;
    let scenes = vec![new_scene("corona2", "C1"), new_scene("declassii", "G1")];
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich {
        fail_media_group: true,
        fail_photo: true,
        fail_text: true,
        ..Default::default()
    });
    let dispatcher = fixture.dispatcher(Some(rich.clone()), Vec::new(), 2, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    // Every level was attempted for each scene, and delivery failure never
    // blocks the notified flag: the scene will not be re-announced.
    assert_eq!(rich.calls().len(), 6);
    for id in ["C1", "G1"] {
        assert_eq!(
            fixture.store.scene_state(id).await.unwrap(),
            Some((true, true))
        );
    }
}

#[tokio::test]
async fn volume_above_threshold_switches_to_summaries() {
    let fixture = Fixture::new().await;
    let scenes: Vec<NewScene> = (0..25)
        .map(|i| new_scene("corona2", &format!("C{i:02}")))
        .collect();
    fixture.seed_scenes(&scenes).await;

    let rich = Arc::new(RecordingRich::default());
    let ntfy = Arc::new(RecordingSummary::new("ntfy"));
    let discord = Arc::new(RecordingSummary::new("discord"));
    let dispatcher = fixture.dispatcher(
        Some(rich.clone()),
        vec![ntfy.clone(), discord.clone()],
        2,
        20,
    );
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    assert!(rich.calls().is_empty());
    for channel in [&ntfy, &discord] {
        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("25 new declassified scenes available!"));
        assert!(messages[0].contains("... and 22 more"));
    }
    for scene in &scenes {
        let state = fixture
            .store
            .scene_state(&scene.record.entity_id)
            .await
            .unwrap();
        assert_eq!(state, Some((true, true)));
    }
}

#[tokio::test]
async fn audit_trail_written_even_with_no_channels() {
    let fixture = Fixture::new().await;
    let scenes = vec![
        new_scene("corona2", "C1"),
        new_scene("declassii", "G1"),
        new_scene("declassiii", "H1"),
    ];
    fixture.seed_scenes(&scenes).await;

    let dispatcher = fixture.dispatcher(None, Vec::new(), 0, 20);
    dispatcher.dispatch(&scenes, &fixture.store).await.unwrap();

    let contents = fixture.audit_contents();
    assert!(contents.contains("# 3 scenes"));
    let url_lines = contents
        .lines()
        .filter(|line| line.starts_with("https://earthexplorer.usgs.gov/scene/metadata/full/"))
        .count();
    assert_eq!(url_lines, 3);
    // The corona2 catalog id appears in its scene's URL.
    assert!(contents.contains("/5e839febdccb64b3/DS-C1/"));

    assert_eq!(
        fixture.store.scene_state("C1").await.unwrap(),
        Some((true, true))
    );
}

#[tokio::test]
async fn empty_dispatch_touches_nothing() {
    let fixture = Fixture::new().await;
    let dispatcher = fixture.dispatcher(None, Vec::new(), 0, 20);
    dispatcher.dispatch(&[], &fixture.store).await.unwrap();
    assert!(!fixture.dir.path().join("new_scenes.txt").exists());
}
