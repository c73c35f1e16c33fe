//! Per-task provenance ledger and its two manifest projections.
//!
//! Entries are keyed by origin path (last write wins) and the manifest is
//! finalized exactly once: the first projection computes a content-derived
//! id over the `(origin, sha256)` pairs sorted by primary hash then origin,
//! and fixes the entry order. Entries added after finalization are not
//! reflected in the id, so the pipeline finalizes only after its metadata
//! stage is complete.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::engine::{self, digest_file, digest_str};
use crate::types::{ExperimentRef, Submitter};

/// Number of columns in the tabular manifest. Stable across the record's
/// lifetime; rows are built through a fixed-size array so the count cannot
/// drift.
pub const COLUMN_COUNT: usize = 17;

const HEADER: [&str; COLUMN_COUNT] = [
    "experiment",
    "submitter",
    "ingest_experiment_id",
    "ingest_experiment_url",
    "captured",
    "archived",
    "origin",
    "sha256",
    "blake3",
    "mimetype",
    "size",
    "modified",
    "share_uri",
    "registry_uri",
    "project",
    "notes",
    "ingest_uri",
];

/// One row of provenance: a single archived file.
#[derive(Clone, Debug, Serialize)]
pub struct LedgerEntry {
    /// Display name relative to the run directory's own basename.
    pub name: String,
    /// Absolute source path on the instrument share.
    pub origin: String,
    /// Absolute destination path in the archive tree.
    pub archived: String,
    pub sha256: String,
    pub blake3: String,
    pub mimetype: String,
    pub size: u64,
    /// Source modification time, ISO-8601 UTC.
    pub modified: String,
    /// Network-share locator for the archived copy.
    pub share_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_uri: Option<String>,
}

struct Finalized {
    id: String,
    /// Origin keys in manifest order.
    order: Vec<String>,
}

/// Accumulates per-file provenance for one task. Exclusively owned by that
/// task's pipeline; never shared.
pub struct ChecksumLedger {
    timestamp: String,
    submitter: Submitter,
    notes: String,
    experiment: Option<ExperimentRef>,
    project: Option<String>,
    ingest_experiment: Option<(String, String)>,
    entries: HashMap<String, LedgerEntry>,
    finalized: Option<Finalized>,
}

impl ChecksumLedger {
    pub fn new(submitter: Submitter, notes: &str) -> Self {
        Self {
            timestamp: engine::iso8601_now(),
            submitter,
            notes: notes.to_string(),
            experiment: None,
            project: None,
            ingest_experiment: None,
            entries: HashMap::new(),
            finalized: None,
        }
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn set_experiment(&mut self, experiment: ExperimentRef) {
        self.experiment = Some(experiment);
    }

    pub fn experiment(&self) -> Option<&ExperimentRef> {
        self.experiment.as_ref()
    }

    pub fn set_project(&mut self, project: Option<String>) {
        self.project = project;
    }

    /// Record the ingestion system's experiment locators.
    pub fn set_ingest_experiment(&mut self, id: &str, url: &str) {
        self.ingest_experiment = Some((id.to_string(), url.to_string()));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Content type recorded for an origin file, once added.
    pub fn file_type(&self, origin: &Path) -> Option<&str> {
        self.entries
            .get(&origin.to_string_lossy().into_owned())
            .map(|e| e.mimetype.as_str())
    }

    /// Hash the archived copy, stat the source, and record the entry.
    /// Keyed by origin path; calling again for the same origin overwrites.
    /// I/O failures (unreadable file during hashing, vanished source)
    /// propagate to the caller — the pipeline decides what to do.
    pub fn add_file(
        &mut self,
        name: &str,
        origin: &Path,
        archived: &Path,
        share_uri: String,
        ingest_uri: Option<String>,
    ) -> Result<()> {
        let meta = std::fs::metadata(origin)
            .with_context(|| format!("stat source {}", origin.display()))?;
        let size = meta.len();
        let modified = meta
            .modified()
            .map(engine::tools::iso8601_system_time)
            .unwrap_or_default();
        let digests = digest_file(archived, size)
            .with_context(|| format!("hash archived copy {}", archived.display()))?;
        let entry = LedgerEntry {
            name: name.to_string(),
            origin: origin.to_string_lossy().into_owned(),
            archived: archived.to_string_lossy().into_owned(),
            sha256: digests.sha256,
            blake3: digests.blake3,
            mimetype: engine::detect_mimetype(origin).to_string(),
            size,
            modified,
            share_uri,
            ingest_uri,
            registry_uri: None,
        };
        self.entries.insert(entry.origin.clone(), entry);
        Ok(())
    }

    /// Annotate an entry with its registry location. Ignored after
    /// finalization (the manifest id no longer reflects changes).
    pub fn set_registry_location(&mut self, origin: &Path, url: &str) {
        if self.is_finalized() {
            log::debug!(
                "ledger already finalized; dropping registry location for {}",
                origin.display()
            );
            return;
        }
        let key = origin.to_string_lossy().into_owned();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.registry_uri = Some(url.to_string());
        }
    }

    /// Content-derived manifest id: SHA-256 over the `(origin, sha256)` pairs
    /// sorted by primary hash then origin. Computed once, cached thereafter.
    pub fn finalize_id(&mut self) -> String {
        if let Some(f) = &self.finalized {
            return f.id.clone();
        }
        let mut order: Vec<&LedgerEntry> = self.entries.values().collect();
        order.sort_by(|a, b| {
            a.sha256
                .cmp(&b.sha256)
                .then_with(|| a.origin.cmp(&b.origin))
        });
        let mut input = String::new();
        for e in &order {
            input.push_str(&e.origin);
            input.push('\n');
            input.push_str(&e.sha256);
            input.push('\n');
        }
        let id = digest_str(&input);
        let order: Vec<String> = order.iter().map(|e| e.origin.clone()).collect();
        self.finalized = Some(Finalized {
            id: id.clone(),
            order,
        });
        id
    }

    fn ordered_entries(&self) -> Vec<&LedgerEntry> {
        match &self.finalized {
            Some(f) => f
                .order
                .iter()
                .filter_map(|origin| self.entries.get(origin))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The JSON manifest. Finalizes the ledger on first call.
    pub fn json_manifest(&mut self) -> String {
        let id = self.finalize_id();
        let ingest = self.ingest_experiment.as_ref().map(|(eid, url)| {
            serde_json::json!({ "id": eid, "url": url })
        });
        let doc = serde_json::json!({
            "id": id,
            "time": self.timestamp,
            "submitter": self.submitter,
            "experiment": self.experiment.as_ref().map(|e| e.url.as_str()),
            "project": self.project,
            "notes": self.notes,
            "ingestExperiment": ingest,
            "files": self.ordered_entries(),
        });
        // A Vec<&LedgerEntry> of plain strings and numbers cannot fail to render.
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    }

    /// The tabular manifest: one header row, one row per entry, sorted by
    /// the same key as the id computation. Finalizes on first call.
    pub fn tabular_manifest(&mut self) -> String {
        self.finalize_id();
        let experiment = self
            .experiment
            .as_ref()
            .map(|e| e.url.clone())
            .unwrap_or_default();
        let submitter = self
            .submitter
            .url
            .clone()
            .unwrap_or_else(|| self.submitter.name.clone());
        let (ingest_id, ingest_url) = match &self.ingest_experiment {
            Some((id, url)) => (id.clone(), url.clone()),
            None => (String::new(), String::new()),
        };
        let project = self.project.clone().unwrap_or_default();

        let mut out = tsv_row(HEADER);
        for e in self.ordered_entries() {
            let size = e.size.to_string();
            out.push_str(&tsv_row([
                &experiment,
                &submitter,
                &ingest_id,
                &ingest_url,
                &self.timestamp,
                &e.archived,
                &e.origin,
                &e.sha256,
                &e.blake3,
                &e.mimetype,
                &size,
                &e.modified,
                &e.share_uri,
                e.registry_uri.as_deref().unwrap_or(""),
                &project,
                &self.notes,
                e.ingest_uri.as_deref().unwrap_or(""),
            ]));
        }
        out
    }
}

/// Render exactly one fixed-width row. The array size pins the column count.
fn tsv_row<S: AsRef<str>>(cols: [S; COLUMN_COUNT]) -> String {
    let mut row = String::new();
    for (i, c) in cols.iter().enumerate() {
        if i > 0 {
            row.push('\t');
        }
        // Tabs and newlines inside a field would shift every later column.
        let cleaned: String = c
            .as_ref()
            .chars()
            .map(|ch| if ch == '\t' || ch == '\n' || ch == '\r' { ' ' } else { ch })
            .collect();
        row.push_str(&cleaned);
    }
    row.push('\n');
    row
}
