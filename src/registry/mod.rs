//! The task store: owns task identity, concurrency, and durable history.
//!
//! One coarse lock guards the active/finished maps; every read-modify-write
//! (allocate-and-insert, move-to-finished, remove) happens under it. A task
//! is moved to the finished set (and its snapshot written) the first time a
//! caller observes its pipeline to be done, so completion detection is
//! only guaranteed at observation time.

pub mod pool;
pub mod snapshot;

use log::{error, info};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::authority::DirectoryAuthority;
use crate::clients::{
    CreateUnderParent, EnsureExperiment, IngestClient, InstrumentInfo, KeepExisting,
    RegistryClient,
};
use crate::engine::iso8601_millis;
use crate::error::CaptureError;
use crate::ledger::ChecksumLedger;
use crate::pipeline::{ArchiveJob, ArchiveSpec, CancelToken, TaskProgress};
use crate::types::{ExperimentRef, Submitter, Target, TaskDescription};
use crate::utils::config::CaptureConfig;

use pool::WorkerPool;
use snapshot::{SNAPSHOT_VERSION, SnapshotRecord};

/// Bookkeeping for a task whose pipeline may still be running.
struct ActiveTask {
    id: String,
    submitter: Submitter,
    directories: Vec<String>,
    progress: Arc<TaskProgress>,
    cancel: CancelToken,
    target: Arc<Mutex<Option<ExperimentRef>>>,
    outcome: Arc<Mutex<Option<String>>>,
}

impl ActiveTask {
    fn to_snapshot(&self) -> SnapshotRecord {
        SnapshotRecord {
            version: SNAPSHOT_VERSION,
            id: self.id.clone(),
            submitter: self.submitter.clone(),
            target: self.target.lock().unwrap().clone(),
            directories: self.directories.clone(),
            start_ms: self.progress.started_at(),
            end_ms: self.progress.finished_at(),
            created_asset: self.outcome.lock().unwrap().clone(),
        }
    }
}

struct Inner {
    next_id: u64,
    active: BTreeMap<String, ActiveTask>,
    finished: BTreeMap<String, SnapshotRecord>,
    /// Ids deleted by callers; lets `delete` tell Gone from NotFound.
    removed: HashSet<String>,
}

pub struct TaskRegistry {
    authority: Arc<DirectoryAuthority>,
    registry_client: Arc<dyn RegistryClient>,
    ingester: Arc<dyn IngestClient>,
    info: InstrumentInfo,
    archive_root: PathBuf,
    metastore_root: PathBuf,
    snapshot_root: PathBuf,
    share_root: String,
    ingest_timeout: Duration,
    ingest_poll: Duration,
    registry_links: bool,
    pool: WorkerPool,
    inner: Mutex<Inner>,
}

impl TaskRegistry {
    /// Build the registry and recover finished tasks from the snapshot
    /// store. Corrupt snapshot files are logged and deleted during recovery.
    pub fn new(
        cfg: &CaptureConfig,
        authority: Arc<DirectoryAuthority>,
        registry_client: Arc<dyn RegistryClient>,
        ingester: Arc<dyn IngestClient>,
    ) -> Self {
        let mut finished = BTreeMap::new();
        for record in snapshot::load_all(&cfg.snapshot_root) {
            finished.insert(record.id.clone(), record);
        }
        if !finished.is_empty() {
            info!("recovered {} finished task(s)", finished.len());
        }
        Self {
            authority,
            registry_client,
            ingester,
            info: InstrumentInfo {
                default_project: cfg.default_project.clone(),
                projects: cfg.projects.clone(),
            },
            archive_root: cfg.archive_root.clone(),
            metastore_root: cfg.metastore_root.clone(),
            snapshot_root: cfg.snapshot_root.clone(),
            share_root: cfg.share_root.clone(),
            ingest_timeout: cfg.ingest_timeout(),
            ingest_poll: cfg.ingest_poll(),
            registry_links: cfg.registry_links,
            pool: WorkerPool::new(cfg.workers),
            inner: Mutex::new(Inner {
                next_id: 0,
                active: BTreeMap::new(),
                finished,
                removed: HashSet::new(),
            }),
        }
    }

    /// Accept one archival request: validate the candidate directories, pick
    /// the first that exists, build the ledger and pipeline, hand the job to
    /// the worker pool, and return the new task id. Rejected requests
    /// consume no pool resources.
    pub fn create(
        &self,
        submitter: Submitter,
        target: Target,
        directories: Vec<String>,
        notes: &str,
    ) -> Result<String, CaptureError> {
        let paths: Vec<PathBuf> = directories.iter().map(PathBuf::from).collect();
        self.authority.validate(&paths)?;
        let source = paths
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or_else(|| CaptureError::Validation("no such directory".to_string()))?;

        let resolved = target.resolved().cloned();
        let provisioner: Box<dyn EnsureExperiment> = match target {
            Target::Experiment(_) => Box::new(KeepExisting),
            Target::CreateUnder(parent) => Box::new(CreateUnderParent { parent }),
        };

        let instrument = self.info.instrument_for(&source);
        let project = self.info.project_for(&instrument, resolved.as_ref());
        let mut ledger = ChecksumLedger::new(submitter.clone(), notes);
        ledger.set_project(Some(project.clone()));
        if let Some(e) = &resolved {
            ledger.set_experiment(e.clone());
        }

        let progress = Arc::new(TaskProgress::new());
        let cancel = CancelToken::new();
        let target_slot = Arc::new(Mutex::new(resolved));
        let outcome_slot = Arc::new(Mutex::new(None));

        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = loop {
                inner.next_id += 1;
                let candidate = format!("task{}", inner.next_id);
                if !inner.active.contains_key(&candidate)
                    && !inner.finished.contains_key(&candidate)
                    && !inner.removed.contains(&candidate)
                {
                    break candidate;
                }
            };
            inner.active.insert(
                id.clone(),
                ActiveTask {
                    id: id.clone(),
                    submitter,
                    directories,
                    progress: Arc::clone(&progress),
                    cancel: cancel.clone(),
                    target: Arc::clone(&target_slot),
                    outcome: Arc::clone(&outcome_slot),
                },
            );
            id
        };

        let job = ArchiveJob::new(ArchiveSpec {
            id: id.clone(),
            source,
            archive_root: self.archive_root.join(&project).join(&instrument),
            metastore_root: self.metastore_root.clone(),
            share_base: format!(
                "{}/{}/{}",
                self.share_root.trim_end_matches('/'),
                project,
                instrument
            ),
            instrument,
            project,
            ledger,
            registry: Arc::clone(&self.registry_client),
            ingester: Arc::clone(&self.ingester),
            provisioner,
            progress,
            cancel,
            target_slot,
            outcome_slot,
            ingest_timeout: self.ingest_timeout,
            ingest_poll: self.ingest_poll,
            registry_links: self.registry_links,
        });
        self.pool.submit(Box::new(move || job.run()));
        Ok(id)
    }

    /// Read-only snapshot of one task. As a side effect, a task observed to
    /// be done is moved from the active set to the finished set and its
    /// durable snapshot is written.
    pub fn describe(&self, id: &str) -> Result<TaskDescription, CaptureError> {
        if id.is_empty() {
            return Err(CaptureError::Validation("empty task id".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.finished.get(id) {
            return Ok(describe_finished(record));
        }
        let Some(task) = inner.active.get(id) else {
            return Err(CaptureError::NotFound(id.to_string()));
        };

        let description = TaskDescription {
            id: id.to_string(),
            status: task.progress.status().to_string(),
            progress: task.progress.value(),
            submitter: task.submitter.clone(),
            target: task.target.lock().unwrap().clone(),
            directories: task.directories.clone(),
            start_time: task.progress.started_at().map(iso8601_millis),
            end_time: task.progress.finished_at().map(iso8601_millis),
            created_asset: task.outcome.lock().unwrap().clone(),
        };

        if task.progress.is_done() {
            // Observation is what retires a task: snapshot it and move it
            // out of the active set.
            let task = inner.active.remove(id).unwrap();
            let record = task.to_snapshot();
            if let Err(e) = record.write(&self.snapshot_root) {
                error!("problem when serializing task {id}: {e:#}");
            }
            inner.finished.insert(id.to_string(), record);
        }
        Ok(description)
    }

    /// Remove a task: cancel it if still active, delete its durable
    /// snapshot if finished. `Gone` for an id that was already removed,
    /// `NotFound` for one never seen.
    pub fn delete(&self, id: &str) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.active.remove(id) {
            inner.removed.insert(id.to_string());
            task.cancel.cancel();
            info!("cancelled and removed active task {id}");
            return Ok(());
        }
        if inner.finished.remove(id).is_some() {
            inner.removed.insert(id.to_string());
            let path = SnapshotRecord::path_for(&self.snapshot_root, id);
            if let Err(e) = std::fs::remove_file(&path) {
                error!("could not delete snapshot {}: {e}", path.display());
            }
            return Ok(());
        }
        if inner.removed.contains(id) {
            Err(CaptureError::Gone(id.to_string()))
        } else {
            Err(CaptureError::NotFound(id.to_string()))
        }
    }

    /// Union of active and finished task ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut ids: BTreeSet<String> = inner.active.keys().cloned().collect();
        ids.extend(inner.finished.keys().cloned());
        ids.into_iter().collect()
    }

    /// Force-cancel every active task, wait for the workers to unwind, and
    /// snapshot each task so nothing vanishes from history. Archive and
    /// registry side effects of cancelled tasks may be incomplete.
    pub fn shutdown(&self) {
        let cancels: Vec<CancelToken> = {
            let inner = self.inner.lock().unwrap();
            inner.active.values().map(|t| t.cancel.clone()).collect()
        };
        for c in &cancels {
            c.cancel();
        }
        self.pool.shutdown();

        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = inner.active.keys().cloned().collect();
        for id in ids {
            let task = match inner.active.remove(&id) {
                Some(t) => t,
                None => continue,
            };
            let record = task.to_snapshot();
            if let Err(e) = record.write(&self.snapshot_root) {
                error!("problem when serializing task {id}: {e:#}");
            }
            inner.finished.insert(id, record);
        }
    }

    pub fn snapshot_root(&self) -> &Path {
        &self.snapshot_root
    }
}

fn describe_finished(record: &SnapshotRecord) -> TaskDescription {
    TaskDescription {
        id: record.id.clone(),
        status: "done".to_string(),
        progress: Some(1.0),
        submitter: record.submitter.clone(),
        target: record.target.clone(),
        directories: record.directories.clone(),
        start_time: record.start_ms.map(iso8601_millis),
        end_time: record.end_ms.map(iso8601_millis),
        created_asset: record.created_asset.clone(),
    }
}
