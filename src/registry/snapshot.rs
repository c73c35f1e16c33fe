//! Durable snapshots of finished tasks: one JSON file per task, named by
//! task id, with an explicit versioned schema so format evolution does not
//! break recovery of older records.

use anyhow::{Context, Result};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::is_hidden_name;
use crate::types::{ExperimentRef, Submitter};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: u32,
    pub id: String,
    pub submitter: Submitter,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<ExperimentRef>,
    pub directories: Vec<String>,
    /// Epoch millis; absent when the worker never started/finished.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_asset: Option<String>,
}

impl SnapshotRecord {
    pub fn path_for(root: &Path, id: &str) -> PathBuf {
        root.join(format!("{id}.json"))
    }

    /// Write the record under `root`, creating the directory as needed.
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("create snapshot root {}", root.display()))?;
        let path = Self::path_for(root, &self.id);
        let body = serde_json::to_string_pretty(self).context("serialize snapshot")?;
        std::fs::write(&path, body)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        let record: SnapshotRecord = serde_json::from_str(&body)
            .with_context(|| format!("parse snapshot {}", path.display()))?;
        if record.version == 0 || record.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "unsupported snapshot version {} in {}",
                record.version,
                path.display()
            );
        }
        Ok(record)
    }
}

/// Load every snapshot under `root`. A file that fails to deserialize is
/// logged and deleted rather than aborting recovery; hidden files and
/// subdirectories are skipped.
pub fn load_all(root: &Path) -> Vec<SnapshotRecord> {
    let mut records = Vec::new();
    let read = match std::fs::read_dir(root) {
        Ok(r) => r,
        Err(e) => {
            warn!("no snapshot store at {}: {e}", root.display());
            return records;
        }
    };
    for entry in read.flatten() {
        let path = entry.path();
        if !path.is_file() || is_hidden_name(&path) {
            continue;
        }
        match SnapshotRecord::load(&path) {
            Ok(record) => records.push(record),
            Err(e) => {
                error!("problem loading saved task from {}; deleting: {e:#}", path.display());
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("could not delete corrupt snapshot {}: {e}", path.display());
                }
            }
        }
    }
    records
}
