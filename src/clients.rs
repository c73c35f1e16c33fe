//! External collaborators, reduced to traits.
//!
//! The wire mechanics of the experiment registry (anti-forgery tokens,
//! multipart bodies) and the ingestion system's file-drop/poll handoff live
//! behind these traits; the pipeline only sees the calls below. Transport
//! failures downgrade a step's output to "no location produced" — they never
//! fail a task.

use anyhow::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::CancelToken;
use crate::types::{ExperimentRef, IngestionOutcome, Submitter};

/// Client of the external experiment registry.
pub trait RegistryClient: Send + Sync {
    /// Create a new experiment record under `parent` and return its reference.
    fn create_experiment(
        &self,
        user: &Submitter,
        parent: &ExperimentRef,
        description: &str,
        title: &str,
    ) -> Result<ExperimentRef>;

    /// Upload a document into an experiment. `Ok(None)` when the registry
    /// accepted the call but produced no location.
    fn upload_document(
        &self,
        user: &Submitter,
        experiment: &ExperimentRef,
        filename: &str,
        description: &str,
        title: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Option<String>>;

    /// Record a link to an externally-held file.
    fn link_external_file(
        &self,
        user: &Submitter,
        experiment: &ExperimentRef,
        description: &str,
        title: &str,
        external_uri: &str,
    ) -> Result<Option<String>>;
}

/// Registry stand-in for deployments without one: logs what would have been
/// sent and produces no locations.
pub struct OfflineRegistry;

impl RegistryClient for OfflineRegistry {
    fn create_experiment(
        &self,
        _user: &Submitter,
        _parent: &ExperimentRef,
        _description: &str,
        title: &str,
    ) -> Result<ExperimentRef> {
        anyhow::bail!("no experiment registry configured (cannot create '{title}')")
    }

    fn upload_document(
        &self,
        _user: &Submitter,
        experiment: &ExperimentRef,
        filename: &str,
        _description: &str,
        _title: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Option<String>> {
        debug!(
            "offline registry: dropping upload of {filename} ({content_type}, {} bytes) for {}",
            body.len(),
            experiment.url
        );
        Ok(None)
    }

    fn link_external_file(
        &self,
        _user: &Submitter,
        _experiment: &ExperimentRef,
        _description: &str,
        _title: &str,
        external_uri: &str,
    ) -> Result<Option<String>> {
        debug!("offline registry: dropping link to {external_uri}");
        Ok(None)
    }
}

/// Bounds on one ingestion wait. Carried into the client so the wait is
/// cancellation-aware and never unbounded.
pub struct IngestWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub cancel: CancelToken,
}

/// Client of the external ingestion system.
pub trait IngestClient: Send + Sync {
    /// Hand `directory` over for ingestion. `Ok(None)` when no ingestion
    /// target is configured for the (instrument, project) pair, or when the
    /// wait ran out before a completion signal appeared.
    fn ingest(
        &self,
        directory: &Path,
        instrument: &str,
        project: &str,
        wait: &IngestWait,
    ) -> Result<Option<IngestionOutcome>>;
}

/// Ingestion stand-in when no ingestion system is deployed.
pub struct DisabledIngester;

impl IngestClient for DisabledIngester {
    fn ingest(
        &self,
        directory: &Path,
        instrument: &str,
        project: &str,
        _wait: &IngestWait,
    ) -> Result<Option<IngestionOutcome>> {
        debug!(
            "ingestion disabled; not handing over {} ({instrument}/{project})",
            directory.display()
        );
        Ok(None)
    }
}

/// Per-task "ensure target experiment" strategy. Replaces pipeline
/// subclassing: the pipeline has one implementation and the variation lives
/// in the injected value.
pub trait EnsureExperiment: Send + Sync {
    /// Return an experiment to bind, or `None` when nothing needs creating
    /// (or creation failed; the failure is logged here, not propagated).
    fn ensure(
        &self,
        registry: &dyn RegistryClient,
        submitter: &Submitter,
        description: &str,
        title: &str,
    ) -> Option<ExperimentRef>;
}

/// The task's target was resolved at creation time; nothing to do.
pub struct KeepExisting;

impl EnsureExperiment for KeepExisting {
    fn ensure(
        &self,
        _registry: &dyn RegistryClient,
        _submitter: &Submitter,
        _description: &str,
        _title: &str,
    ) -> Option<ExperimentRef> {
        None
    }
}

/// Provision a fresh experiment under a parent study.
pub struct CreateUnderParent {
    pub parent: ExperimentRef,
}

impl EnsureExperiment for CreateUnderParent {
    fn ensure(
        &self,
        registry: &dyn RegistryClient,
        submitter: &Submitter,
        description: &str,
        title: &str,
    ) -> Option<ExperimentRef> {
        match registry.create_experiment(submitter, &self.parent, description, title) {
            Ok(exp) => Some(exp),
            Err(e) => {
                warn!("failed to create experiment '{title}': {e:#}");
                None
            }
        }
    }
}

/// Knows which instrument produced a directory and which project it belongs
/// to. The instrument is the source directory's parent (the vetted root);
/// the project comes from the configured map, then the target experiment,
/// then the configured default.
#[derive(Clone, Debug)]
pub struct InstrumentInfo {
    pub default_project: String,
    pub projects: HashMap<String, String>,
}

impl InstrumentInfo {
    pub fn instrument_for(&self, source: &Path) -> String {
        source
            .parent()
            .and_then(|p| p.file_name())
            .or_else(|| source.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn project_for(&self, instrument: &str, target: Option<&ExperimentRef>) -> String {
        if let Some(p) = self.projects.get(instrument) {
            return p.clone();
        }
        if let Some(p) = target.and_then(|t| t.project.as_deref()) {
            return p.to_string();
        }
        self.default_project.clone()
    }
}
