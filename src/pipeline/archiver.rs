//! The archival state machine: one job per accepted request.
//!
//! Stages run strictly in order on the job's worker thread:
//! listing → copying → ingesting → registering → extracting-metadata →
//! bagging → finishing. Cancellation is polled between stages and between
//! iterations of every per-file loop; per-file faults are logged, counted,
//! and isolated to the file. The top-level [`ArchiveJob::run`] never
//! propagates an error — an uncaught fault is logged and the task simply
//! ends with no created asset.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walkdir::WalkDir;

use crate::clients::{EnsureExperiment, IngestClient, IngestWait, RegistryClient};
use crate::engine::{self, now_millis, path_relative_to, path_to_name, resolve_to_uri};
use crate::ledger::ChecksumLedger;
use crate::types::{ExperimentRef, IngestionOutcome};
use crate::utils::config::TSV_CONTENT_TYPE;

use super::cancel::CancelToken;
use super::progress::{Stage, TaskProgress};

/// A name/origin pair from the listing stage; the archive destination is
/// filled in by the copying stage.
struct PendingEntry {
    /// Path relative to the run directory's parent, starting with the run
    /// directory's own basename ("run1/sub/c.txt").
    name: String,
    origin: PathBuf,
    archived: Option<PathBuf>,
}

/// Everything an [`ArchiveJob`] needs, bundled so the registry (and tests)
/// can construct jobs without a parameter tower.
pub struct ArchiveSpec {
    pub id: String,
    /// The validated source directory.
    pub source: PathBuf,
    /// Project/instrument-resolved destination root; entries land under it.
    pub archive_root: PathBuf,
    /// Where the finalized JSON manifest is written.
    pub metastore_root: PathBuf,
    /// Share-URI base for the project/instrument pair.
    pub share_base: String,
    pub instrument: String,
    pub project: String,
    pub ledger: ChecksumLedger,
    pub registry: Arc<dyn RegistryClient>,
    pub ingester: Arc<dyn IngestClient>,
    pub provisioner: Box<dyn EnsureExperiment>,
    pub progress: Arc<TaskProgress>,
    pub cancel: CancelToken,
    /// Mirror of the bound experiment, readable by status queries.
    pub target_slot: Arc<Mutex<Option<ExperimentRef>>>,
    /// Where the created-asset location lands when the job completes.
    pub outcome_slot: Arc<Mutex<Option<String>>>,
    pub ingest_timeout: Duration,
    pub ingest_poll: Duration,
    pub registry_links: bool,
}

pub struct ArchiveJob {
    spec: ArchiveSpec,
    run_name: String,
    entries: Vec<PendingEntry>,
}

impl ArchiveJob {
    pub fn new(spec: ArchiveSpec) -> Self {
        let run_name = spec
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            spec,
            run_name,
            entries: Vec::new(),
        }
    }

    /// Run the whole workflow. Consumes the job; the outcome is delivered
    /// through the shared slots and the progress record.
    pub fn run(mut self) {
        let id = self.spec.id.clone();
        info!("task[{id}] started archive");
        self.spec.progress.mark_started(now_millis());
        let asset = match self.workflow() {
            Ok(asset) => asset,
            Err(e) => {
                warn!("task[{id}] unexpected problem processing: {e:#}");
                self.spec.progress.set_stage(Stage::Failed);
                None
            }
        };
        *self.spec.outcome_slot.lock().unwrap() = asset;
        self.spec.progress.mark_finished(now_millis());
        info!("task[{id}] finished archive");
    }

    fn cancelled(&self) -> bool {
        if self.spec.cancel.is_cancelled() {
            self.spec.progress.set_stage(Stage::Cancelled);
            info!("task[{}] cancelled", self.spec.id);
            true
        } else {
            false
        }
    }

    fn workflow(&mut self) -> Result<Option<String>> {
        self.spec.progress.set_stage(Stage::Listing);
        self.list_files()?;
        if self.cancelled() {
            return Ok(None);
        }

        self.spec.progress.set_stage(Stage::Copying);
        self.copy_to_archive();
        if self.cancelled() {
            return Ok(None);
        }

        self.spec.progress.set_stage(Stage::Ingesting);
        let ingestion = self.ingest();
        if self.cancelled() {
            return Ok(None);
        }

        self.spec.progress.set_stage(Stage::Registering);
        if self.spec.ledger.experiment().is_none() {
            self.make_experiment(ingestion.as_ref());
        }

        self.spec.progress.set_stage(Stage::ExtractingMetadata);
        self.extract_metadata(ingestion.as_ref());
        if self.cancelled() {
            return Ok(None);
        }

        self.spec.progress.set_stage(Stage::Bagging);
        self.bag_it_up();
        if self.cancelled() {
            return Ok(None);
        }

        self.spec.progress.set_stage(Stage::Finishing);
        // Links must land before the manifests render; the ledger stops
        // accepting registry locations once it is finalized.
        self.record_links(ingestion.as_ref());
        self.save_json_manifest();
        let asset = self.publish_manifest(ingestion.as_ref());
        self.spec.progress.set_stage(Stage::Done);
        Ok(asset)
    }

    /// Enumerate every regular file under the source directory and fix the
    /// progress denominator. Names are kept relative to the run directory's
    /// parent so the run basename survives into the archive tree.
    fn list_files(&mut self) -> Result<()> {
        for item in WalkDir::new(&self.spec.source).min_depth(1) {
            if self.spec.cancel.is_cancelled() {
                break;
            }
            let entry = match item {
                Ok(e) => e,
                Err(e) => {
                    warn!("task[{}] skipping during listing: {e}", self.spec.id);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = path_relative_to(entry.path(), &self.spec.source)
                .unwrap_or_else(|| entry.path().to_path_buf());
            self.entries.push(PendingEntry {
                name: format!("{}/{}", self.run_name, path_to_name(&rel)),
                origin: entry.into_path(),
                archived: None,
            });
        }
        self.spec.progress.set_file_count(self.entries.len());
        debug!(
            "task[{}] listed {} files under {}",
            self.spec.id,
            self.entries.len(),
            self.spec.source.display()
        );
        Ok(())
    }

    /// Copy every listed file into the archive tree. A destination that
    /// already exists counts as success so a retried task is idempotent;
    /// per-file failures are logged and do not abort the stage.
    fn copy_to_archive(&mut self) {
        for ent in &mut self.entries {
            if self.spec.cancel.is_cancelled() {
                break;
            }
            let dest = self.spec.archive_root.join(&ent.name);
            debug!("task[{}] copying {}", self.spec.id, ent.origin.display());
            match copy_one_file(&ent.origin, &dest) {
                Ok(()) => ent.archived = Some(dest),
                Err(e) => warn!(
                    "task[{}] failed to copy {} to {}: {e:#}",
                    self.spec.id,
                    ent.origin.display(),
                    dest.display()
                ),
            }
            self.spec.progress.add_copy();
        }
    }

    /// Hand the copied run directory to the ingestion system. Failure (or a
    /// timed-out wait) downgrades to "no ingestion", never a task failure.
    fn ingest(&self) -> Option<IngestionOutcome> {
        let base = self.spec.archive_root.join(&self.run_name);
        let wait = IngestWait {
            timeout: self.spec.ingest_timeout,
            poll_interval: self.spec.ingest_poll,
            cancel: self.spec.cancel.clone(),
        };
        match self
            .spec
            .ingester
            .ingest(&base, &self.spec.instrument, &self.spec.project, &wait)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("task[{}] problem during ingestion phase: {e:#}", self.spec.id);
                None
            }
        }
    }

    /// Provision a target experiment when the request did not bring one.
    fn make_experiment(&mut self, ingestion: Option<&IngestionOutcome>) {
        let title = experiment_title(&self.run_name);
        let description = self.describe_experiment(&title, ingestion);
        let submitter = self.spec.ledger.submitter().clone();
        let created = self.spec.provisioner.ensure(
            self.spec.registry.as_ref(),
            &submitter,
            &description,
            &title,
        );
        if let Some(experiment) = created {
            info!(
                "task[{}] created experiment at {}",
                self.spec.id, experiment.url
            );
            self.spec.ledger.set_experiment(experiment.clone());
            *self.spec.target_slot.lock().unwrap() = Some(experiment);
        }
    }

    fn describe_experiment(&self, title: &str, ingestion: Option<&IngestionOutcome>) -> String {
        let when = self
            .spec
            .progress
            .started_at()
            .map(engine::iso8601_millis)
            .unwrap_or_default();
        let mut description = format!(
            "Capture of data relating to '{title}' from the {} instrument in the {} project at {when}.",
            self.spec.instrument, self.spec.project
        );
        if let Some(i) = ingestion {
            description.push_str(&format!(
                "\nIngested experiment: {} — dataset: {}",
                i.experiment_url, i.dataset_url
            ));
        }
        description
    }

    /// Compute checksums and content types for every entry and append the
    /// enriched records to the ledger. Per-file failures are logged and
    /// counted, never fatal to the stage.
    fn extract_metadata(&mut self, ingestion: Option<&IngestionOutcome>) {
        if let Some(i) = ingestion {
            self.spec
                .ledger
                .set_ingest_experiment(&i.experiment_id, &i.experiment_url);
        }
        let spec = &mut self.spec;
        for ent in &self.entries {
            if spec.cancel.is_cancelled() {
                break;
            }
            debug!("task[{}] characterising {}", spec.id, ent.origin.display());
            let outcome = match &ent.archived {
                Some(archived) => {
                    let share_uri = resolve_to_uri(&spec.share_base, &ent.name);
                    let ingest_uri =
                        ingestion.map(|i| resolve_to_uri(&i.dataset_url, &ent.name));
                    spec.ledger
                        .add_file(&ent.name, &ent.origin, archived, share_uri, ingest_uri)
                }
                None => Err(anyhow::anyhow!("no archived copy")),
            };
            if let Err(e) = outcome {
                warn!(
                    "task[{}] failed to generate metadata for {}: {e:#}",
                    spec.id,
                    ent.origin.display()
                );
            }
            spec.progress.add_meta();
        }
    }

    /// Reserved stage: packaging the archived tree plus its manifest into a
    /// transfer bag. Deliberately a distinct, observable step.
    fn bag_it_up(&mut self) {
        // TODO: build the BagIt-style bag around the archived run directory.
    }

    /// Write the finalized JSON manifest into the metadata store, never
    /// overwriting: a name collision gets a numeric disambiguator.
    fn save_json_manifest(&mut self) {
        let path = unique_manifest_path(&self.spec.metastore_root, &self.run_name);
        let body = self.spec.ledger.json_manifest();
        if let Err(e) = std::fs::create_dir_all(&self.spec.metastore_root)
            .and_then(|_| std::fs::write(&path, body))
        {
            warn!(
                "task[{}] failed to write metadata descriptor to {}: {e}",
                self.spec.id,
                path.display()
            );
        }
    }

    /// Record per-file registry links when configured and ingestion produced
    /// locators.
    fn record_links(&mut self, ingestion: Option<&IngestionOutcome>) {
        if self.spec.registry_links {
            if let Some(i) = ingestion {
                self.link_entries(i);
            }
        }
        // Three counted operations per file regardless of configuration, so
        // progress always lands on 1.0.
        self.spec
            .progress
            .set_link_count(self.spec.progress.file_count());
    }

    /// Upload the tabular manifest to the registry. Returns its registry
    /// location, or `None` when that step produced nothing.
    fn publish_manifest(&mut self, ingestion: Option<&IngestionOutcome>) -> Option<String> {
        let Some(experiment) = self.spec.ledger.experiment().cloned() else {
            warn!(
                "task[{}] no experiment bound; manifest not uploaded",
                self.spec.id
            );
            return None;
        };
        let description = self.describe_manifest(ingestion);
        let submitter = self.spec.ledger.submitter().clone();
        let body = self.spec.ledger.tabular_manifest();
        match self.spec.registry.upload_document(
            &submitter,
            &experiment,
            "manifest.tsv",
            &description,
            "Experimental Results Manifest",
            TSV_CONTENT_TYPE,
            body.as_bytes(),
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!("task[{}] failed to upload manifest: {e:#}", self.spec.id);
                None
            }
        }
    }

    fn link_entries(&mut self, ingestion: &IngestionOutcome) {
        let Some(experiment) = self.spec.ledger.experiment().cloned() else {
            return;
        };
        let submitter = self.spec.ledger.submitter().clone();
        for ent in &self.entries {
            if self.spec.cancel.is_cancelled() {
                break;
            }
            let external = resolve_to_uri(&ingestion.dataset_url, &ent.name);
            let tail = ent.name.rsplit('/').next().unwrap_or(&ent.name);
            let title = format!("Experimental Results: {tail}");
            let description = self.describe_link(ent.origin.as_path(), &ent.name);
            match self.spec.registry.link_external_file(
                &submitter,
                &experiment,
                &description,
                &title,
                &external,
            ) {
                Ok(Some(url)) => self.spec.ledger.set_registry_location(&ent.origin, &url),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "task[{}] failed to record link for {}; skipping remaining links: {e:#}",
                        self.spec.id, ent.name
                    );
                    break;
                }
            }
            self.spec.progress.add_link();
        }
    }

    fn describe_link(&self, origin: &Path, name: &str) -> String {
        let mimetype = self
            .spec
            .ledger
            .file_type(origin)
            .unwrap_or("unknown")
            .to_string();
        format!(
            "File copied from {} of (presumed) type {mimetype}, generated by {}. Share location: {}",
            origin.display(),
            self.spec.instrument,
            resolve_to_uri(&self.spec.share_base, name)
        )
    }

    fn describe_manifest(&self, ingestion: Option<&IngestionOutcome>) -> String {
        let when = self
            .spec
            .progress
            .started_at()
            .map(engine::iso8601_millis)
            .unwrap_or_default();
        let mut description = format!(
            "Tab-separated manifest of files copied from instrument {} to the archive store at {when}.",
            self.spec.instrument
        );
        if let Some(i) = ingestion {
            description.push_str(&format!(
                "\nThe data is also available in the ingestion system at {}.",
                i.dataset_url
            ));
        }
        description
    }
}

fn copy_one_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(dir) = dest.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if dest.exists() {
        // Assume it is the same thing; a retried task must not fail here.
        return Ok(());
    }
    std::fs::copy(source, dest)?;
    Ok(())
}

/// Human-readable experiment title from a run directory name: underscores
/// become spaces, and a leading `YYYY MM DD` triplet is joined with slashes.
pub fn experiment_title(directory_name: &str) -> String {
    let title = directory_name.trim_end_matches('/').replace('_', " ");
    let parts: Vec<&str> = title.splitn(4, ' ').collect();
    if parts.len() == 4
        && parts[..3]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        return format!("{}/{}/{} {}", parts[0], parts[1], parts[2], parts[3]);
    }
    title
}

/// `<run>.json` under the metadata store, or `<run>.1.json`, `<run>.2.json`
/// and so on when the name is taken. Existing manifests are never clobbered.
pub fn unique_manifest_path(metastore_root: &Path, run_name: &str) -> PathBuf {
    let plain = metastore_root.join(format!("{run_name}.json"));
    if !plain.exists() {
        return plain;
    }
    let mut n = 1;
    loop {
        let candidate = metastore_root.join(format!("{run_name}.{n}.json"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
