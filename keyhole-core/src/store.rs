//! Durable catalog store backed by SQLite.
//!
//! Two tables: `scenes` holds every record ever observed plus its
//! availability/notification state, `meta` is a string keyed table carrying
//! the global seeded flag and the per-dataset backfill cursors. Rows are
//! never deleted and the state bits only ever flip 0 to 1, so every mutation
//! here is safe to re-run after a crash.

use std::collections::HashSet;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::Result;
use crate::scene::SceneRecord;

const SEEDED_KEY: &str = "all_scenes_seeded";

#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // Single connection: the pipeline is sequential, and this keeps an
        // in-memory database from fragmenting across pool connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scenes (
                entity_id            TEXT PRIMARY KEY,
                dataset              TEXT NOT NULL,
                display_id           TEXT,
                acquisition_date     TEXT,
                publish_date         TEXT,
                first_seen_available TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                notified             INTEGER DEFAULT 0,
                available            INTEGER DEFAULT 1,
                geometry             TEXT,
                browse_url           TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_dataset ON scenes(dataset)",
            "CREATE INDEX IF NOT EXISTS idx_notified ON scenes(notified)",
            "CREATE INDEX IF NOT EXISTS idx_available ON scenes(available)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Every entity id ever recorded for a dataset, regardless of state.
    pub async fn known_ids(&self, dataset: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT entity_id FROM scenes WHERE dataset = ?")
            .bind(dataset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Entity ids recorded as unscanned placeholders (`available = 0`).
    pub async fn unavailable_ids(&self, dataset: &str) -> Result<HashSet<String>> {
        let rows =
            sqlx::query("SELECT entity_id FROM scenes WHERE dataset = ? AND available = 0")
                .bind(dataset)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Insert scenes that are not yet present. Existing rows are left
    /// untouched (first write wins); the whole batch commits atomically.
    /// Returns the number of rows actually inserted.
    pub async fn upsert_scenes(
        &self,
        scenes: &[SceneRecord],
        dataset: &str,
        available: bool,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for scene in scenes {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO scenes
                    (entity_id, dataset, display_id, acquisition_date, publish_date,
                     available, geometry, browse_url)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&scene.entity_id)
            .bind(dataset)
            .bind(&scene.display_id)
            .bind(scene.acquisition_date())
            .bind(scene.publish_day())
            .bind(available as i64)
            .bind(scene.geometry_json())
            .bind(scene.browse_url())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Flip scenes from unscanned to available (they have been digitized).
    /// Unknown ids are a no-op.
    pub async fn mark_available(&self, entity_ids: &[String]) -> Result<()> {
        self.set_flag("available", entity_ids).await
    }

    pub async fn mark_notified(&self, entity_ids: &[String]) -> Result<()> {
        self.set_flag("notified", entity_ids).await
    }

    async fn set_flag(&self, column: &str, entity_ids: &[String]) -> Result<()> {
        if entity_ids.is_empty() {
            return Ok(());
        }
        // `column` is one of two fixed names, never user input.
        let statement = format!("UPDATE scenes SET {column} = 1 WHERE entity_id = ?");
        let mut tx = self.pool.begin().await?;
        for entity_id in entity_ids {
            sqlx::query(&statement)
                .bind(entity_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Whether the one-time full-catalog backfill has completed for every
    /// dataset.
    pub async fn is_seeded(&self) -> Result<bool> {
        Ok(self.get_meta(SEEDED_KEY).await?.as_deref() == Some("1"))
    }

    pub async fn mark_seeded(&self) -> Result<()> {
        self.set_meta(SEEDED_KEY, "1").await?;
        info!("marked catalog store as fully seeded");
        Ok(())
    }

    /// Resume position for a dataset's backfill walk; 1 when no walk is in
    /// progress.
    pub async fn get_seed_cursor(&self, dataset: &str) -> Result<u64> {
        let value = self.get_meta(&cursor_key(dataset)).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(1))
    }

    pub async fn save_seed_cursor(&self, dataset: &str, starting_number: u64) -> Result<()> {
        self.set_meta(&cursor_key(dataset), &starting_number.to_string())
            .await
    }

    /// Remove the resume cursor once a dataset's backfill completes; its
    /// absence is the "done" state.
    pub async fn clear_seed_cursor(&self, dataset: &str) -> Result<()> {
        sqlx::query("DELETE FROM meta WHERE key = ?")
            .bind(cursor_key(dataset))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scene counts per dataset, for the end-of-run report.
    pub async fn dataset_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT dataset, COUNT(*) FROM scenes GROUP BY dataset ORDER BY dataset",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect())
    }

    /// Availability/notified state for one scene; used by tests and the
    /// stats report.
    pub async fn scene_state(&self, entity_id: &str) -> Result<Option<(bool, bool)>> {
        let row = sqlx::query("SELECT available, notified FROM scenes WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| (row.get::<i64, _>(0) != 0, row.get::<i64, _>(1) != 0)))
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn cursor_key(dataset: &str) -> String {
    format!("seed_cursor_{dataset}")
}
