//! Append-only audit file of every newly-available scene ever detected.
//!
//! Written on every dispatch regardless of channel configuration, so the
//! full history survives even with all notifications disabled.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

use crate::config::DatasetSpec;
use crate::scene::{self, NewScene};

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one block for this cycle: a timestamp header, then an
    /// identifier line and the EarthExplorer metadata URL per scene.
    pub fn append(
        &self,
        scenes: &[NewScene],
        datasets: &HashMap<String, DatasetSpec>,
    ) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(
            file,
            "\n# New scenes - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(file, "# {} scenes", scenes.len())?;

        for scene in scenes {
            let display_id = scene.record.label();
            let date = scene
                .record
                .acquisition_date()
                .unwrap_or_else(|| "unknown".to_string());
            let catalog_id = datasets
                .get(&scene.dataset)
                .map(|spec| spec.catalog_id.as_str())
                .unwrap_or("");

            writeln!(file, "# {} | {} | {}", display_id, scene.dataset, date)?;
            writeln!(file, "{}", scene::metadata_url(catalog_id, display_id))?;
        }
        Ok(())
    }
}
