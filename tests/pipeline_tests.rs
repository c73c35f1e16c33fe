use anyhow::Result;
use datacap::clients::{
    CreateUnderParent, EnsureExperiment, IngestClient, IngestWait, KeepExisting, RegistryClient,
};
use datacap::engine::resolve_to_uri;
use datacap::ledger::ChecksumLedger;
use datacap::pipeline::{
    ArchiveJob, ArchiveSpec, CancelToken, Stage, TaskProgress, experiment_title,
    unique_manifest_path,
};
use datacap::types::{ExperimentRef, IngestionOutcome, Submitter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registry double: hands out locations and records every call.
#[derive(Default)]
struct FakeRegistry {
    uploads: Mutex<Vec<(String, String, usize)>>,
    links: Mutex<Vec<String>>,
}

impl RegistryClient for FakeRegistry {
    fn create_experiment(
        &self,
        _user: &Submitter,
        parent: &ExperimentRef,
        _description: &str,
        title: &str,
    ) -> Result<ExperimentRef> {
        Ok(ExperimentRef {
            title: title.to_string(),
            url: format!("{}/child", parent.url),
            project: parent.project.clone(),
        })
    }

    fn upload_document(
        &self,
        _user: &Submitter,
        _experiment: &ExperimentRef,
        filename: &str,
        _description: &str,
        _title: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Option<String>> {
        self.uploads.lock().unwrap().push((
            filename.to_string(),
            content_type.to_string(),
            body.len(),
        ));
        Ok(Some("https://registry.example/docs/manifest".to_string()))
    }

    fn link_external_file(
        &self,
        _user: &Submitter,
        _experiment: &ExperimentRef,
        _description: &str,
        _title: &str,
        external_uri: &str,
    ) -> Result<Option<String>> {
        let n = {
            let mut links = self.links.lock().unwrap();
            links.push(external_uri.to_string());
            links.len()
        };
        Ok(Some(format!("https://registry.example/links/{n}")))
    }
}

struct FakeIngester;

impl IngestClient for FakeIngester {
    fn ingest(
        &self,
        _directory: &Path,
        _instrument: &str,
        _project: &str,
        _wait: &IngestWait,
    ) -> Result<Option<IngestionOutcome>> {
        Ok(Some(IngestionOutcome {
            dataset_id: "ds-1".to_string(),
            dataset_url: "https://ingest.example/datasets/ds-1".to_string(),
            experiment_id: "exp-1".to_string(),
            experiment_url: "https://ingest.example/experiments/exp-1".to_string(),
        }))
    }
}

struct NoIngester;

impl IngestClient for NoIngester {
    fn ingest(
        &self,
        _directory: &Path,
        _instrument: &str,
        _project: &str,
        _wait: &IngestWait,
    ) -> Result<Option<IngestionOutcome>> {
        Ok(None)
    }
}

fn submitter() -> Submitter {
    Submitter {
        name: "R. Lab".to_string(),
        url: None,
    }
}

fn experiment() -> ExperimentRef {
    ExperimentRef {
        title: "pre-bound".to_string(),
        url: "https://registry.example/exp/42".to_string(),
        project: Some("atlas".to_string()),
    }
}

/// Standard scenario tree: a.txt (5 bytes), b.txt (empty), sub/c.txt
/// (10 bytes).
fn make_source(root: &Path) -> PathBuf {
    let source = root.join("instrumentA/run1");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::write(source.join("a.txt"), b"aaaaa").unwrap();
    fs::write(source.join("b.txt"), b"").unwrap();
    fs::write(source.join("sub/c.txt"), b"cccccccccc").unwrap();
    source
}

struct SpecParts {
    spec: ArchiveSpec,
    archive_root: PathBuf,
    metastore_root: PathBuf,
    progress: Arc<TaskProgress>,
    outcome_slot: Arc<Mutex<Option<String>>>,
    target_slot: Arc<Mutex<Option<ExperimentRef>>>,
}

fn make_spec(
    root: &Path,
    source: PathBuf,
    registry: Arc<dyn RegistryClient>,
    ingester: Arc<dyn IngestClient>,
    provisioner: Box<dyn EnsureExperiment>,
    ledger: ChecksumLedger,
    registry_links: bool,
) -> SpecParts {
    let archive_root = root.join("archive/atlas/instrumentA");
    let metastore_root = root.join("metastore");
    let progress = Arc::new(TaskProgress::new());
    let outcome_slot = Arc::new(Mutex::new(None));
    let target_slot = Arc::new(Mutex::new(None));
    let spec = ArchiveSpec {
        id: "task1".to_string(),
        source,
        archive_root: archive_root.clone(),
        metastore_root: metastore_root.clone(),
        share_base: "file://share/atlas/instrumentA".to_string(),
        instrument: "instrumentA".to_string(),
        project: "atlas".to_string(),
        ledger,
        registry,
        ingester,
        provisioner,
        progress: Arc::clone(&progress),
        cancel: CancelToken::new(),
        target_slot: Arc::clone(&target_slot),
        outcome_slot: Arc::clone(&outcome_slot),
        ingest_timeout: Duration::from_secs(1),
        ingest_poll: Duration::from_millis(10),
        registry_links,
    };
    SpecParts {
        spec,
        archive_root,
        metastore_root,
        progress,
        outcome_slot,
        target_slot,
    }
}

// --- helpers ---

#[test]
fn test_experiment_title_from_directory_name() {
    assert_eq!(experiment_title("my_rabbit_run"), "my rabbit run");
    assert_eq!(experiment_title("2016_03_01_rabbit_run"), "2016/03/01 rabbit run");
    assert_eq!(experiment_title("2016_03_rabbit"), "2016 03 rabbit");
    assert_eq!(experiment_title("plain"), "plain");
}

#[test]
fn test_unique_manifest_path_disambiguates() {
    let tmp = tempfile::tempdir().unwrap();
    assert_eq!(
        unique_manifest_path(tmp.path(), "run1"),
        tmp.path().join("run1.json")
    );
    fs::write(tmp.path().join("run1.json"), b"{}").unwrap();
    assert_eq!(
        unique_manifest_path(tmp.path(), "run1"),
        tmp.path().join("run1.1.json")
    );
    fs::write(tmp.path().join("run1.1.json"), b"{}").unwrap();
    assert_eq!(
        unique_manifest_path(tmp.path(), "run1"),
        tmp.path().join("run1.2.json")
    );
}

#[test]
fn test_resolve_to_uri_escaping() {
    assert_eq!(
        resolve_to_uri("file://share/", "run1/a b.txt"),
        "file://share/run1/a+b.txt"
    );
    assert_eq!(
        resolve_to_uri("file://share", "run1/100%.txt"),
        "file://share/run1/100%25.txt"
    );
}

#[test]
fn test_progress_sequence() {
    let p = TaskProgress::new();
    assert_eq!(p.value(), None, "unknown until the file count is fixed");
    p.set_file_count(2);
    assert_eq!(p.value(), Some(0.0));
    p.add_copy();
    p.add_copy();
    p.add_meta();
    let mid = p.value().unwrap();
    assert!(mid > 0.0 && mid < 1.0, "mid-flight value was {mid}");
    p.add_meta();
    p.set_link_count(2);
    assert_eq!(p.value(), Some(1.0));
    p.mark_finished(1);
    assert_eq!(p.value(), Some(1.0));
    assert_eq!(p.status(), "done");
}

#[test]
fn test_progress_done_wins_even_with_zero_files() {
    let p = TaskProgress::new();
    p.set_stage(Stage::Listing);
    assert_eq!(p.status(), "listing");
    assert_eq!(p.value(), None);
    p.mark_finished(5);
    assert_eq!(p.value(), Some(1.0));
    assert_eq!(p.status(), "done");
}

// --- full workflow ---

#[test]
fn test_workflow_archives_and_publishes_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let mut ledger = ChecksumLedger::new(submitter(), "scenario run");
    ledger.set_experiment(experiment());
    ledger.set_project(Some("atlas".to_string()));
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(KeepExisting),
        ledger,
        false,
    );

    ArchiveJob::new(parts.spec).run();

    // Copies land under <archive_root>/<run_name>/...
    assert!(parts.archive_root.join("run1/a.txt").exists());
    assert!(parts.archive_root.join("run1/b.txt").exists());
    assert!(parts.archive_root.join("run1/sub/c.txt").exists());

    // JSON manifest written with all three entries and non-empty hash pairs.
    let body = fs::read_to_string(parts.metastore_root.join("run1.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let files = json["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    for f in files {
        assert!(!f["sha256"].as_str().unwrap().is_empty());
        assert!(!f["blake3"].as_str().unwrap().is_empty());
    }

    // Tabular manifest uploaded; its location is the created asset.
    let uploads = registry.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "manifest.tsv");
    assert_eq!(uploads[0].1, "text/tab-separated-values");
    assert_eq!(
        parts.outcome_slot.lock().unwrap().as_deref(),
        Some("https://registry.example/docs/manifest")
    );

    assert_eq!(parts.progress.value(), Some(1.0));
    assert_eq!(parts.progress.status(), "done");
    assert!(parts.progress.started_at().is_some());
    assert!(parts.progress.finished_at().is_some());
}

#[test]
fn test_workflow_provisions_experiment_when_unbound() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let parent = ExperimentRef {
        title: "parent study".to_string(),
        url: "https://registry.example/exp/parent".to_string(),
        project: Some("atlas".to_string()),
    };
    let mut ledger = ChecksumLedger::new(submitter(), "");
    ledger.set_project(Some("atlas".to_string()));
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(CreateUnderParent { parent }),
        ledger,
        false,
    );

    ArchiveJob::new(parts.spec).run();

    // The provisioned experiment is mirrored for status queries and used
    // for the upload.
    let bound = parts.target_slot.lock().unwrap().clone().unwrap();
    assert_eq!(bound.url, "https://registry.example/exp/parent/child");
    assert_eq!(registry.uploads.lock().unwrap().len(), 1);
    assert!(parts.outcome_slot.lock().unwrap().is_some());
}

#[test]
fn test_workflow_without_experiment_uploads_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let ledger = ChecksumLedger::new(submitter(), "");
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(KeepExisting),
        ledger,
        false,
    );

    ArchiveJob::new(parts.spec).run();

    assert!(registry.uploads.lock().unwrap().is_empty());
    assert!(parts.outcome_slot.lock().unwrap().is_none());
    // Files are still archived and described even without a registry target.
    assert!(parts.archive_root.join("run1/a.txt").exists());
    assert!(parts.metastore_root.join("run1.json").exists());
    assert_eq!(parts.progress.value(), Some(1.0));
}

#[test]
fn test_workflow_records_ingestion_and_links() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let mut ledger = ChecksumLedger::new(submitter(), "");
    ledger.set_experiment(experiment());
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(FakeIngester),
        Box::new(KeepExisting),
        ledger,
        true,
    );

    ArchiveJob::new(parts.spec).run();

    let links = registry.links.lock().unwrap();
    assert_eq!(links.len(), 3);
    for uri in links.iter() {
        assert!(
            uri.starts_with("https://ingest.example/datasets/ds-1/run1/"),
            "unexpected link target {uri}"
        );
    }

    let body = fs::read_to_string(parts.metastore_root.join("run1.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ingestExperiment"]["id"], "exp-1");
    for f in json["files"].as_array().unwrap() {
        assert!(
            f["ingest_uri"]
                .as_str()
                .unwrap()
                .starts_with("https://ingest.example/datasets/ds-1/"),
        );
        assert!(
            f["registry_uri"]
                .as_str()
                .unwrap()
                .starts_with("https://registry.example/links/"),
        );
    }
    assert_eq!(parts.progress.value(), Some(1.0));
}

#[test]
fn test_precancelled_job_copies_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let mut ledger = ChecksumLedger::new(submitter(), "");
    ledger.set_experiment(experiment());
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(KeepExisting),
        ledger,
        false,
    );
    parts.spec.cancel.cancel();

    ArchiveJob::new(parts.spec).run();

    assert_eq!(parts.progress.stage(), Stage::Cancelled);
    assert!(!parts.archive_root.join("run1/a.txt").exists());
    assert!(!parts.metastore_root.join("run1.json").exists());
    assert!(registry.uploads.lock().unwrap().is_empty());
    assert!(parts.outcome_slot.lock().unwrap().is_none());
    assert!(parts.progress.is_done());
}

#[test]
fn test_per_file_failure_keeps_task_completing() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let mut ledger = ChecksumLedger::new(submitter(), "");
    ledger.set_experiment(experiment());
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(KeepExisting),
        ledger,
        false,
    );
    // Occupy the sub/ destination with a plain file: the copy of sub/c.txt
    // cannot create its parent directory and fails, leaving that entry
    // without an archived copy.
    fs::create_dir_all(parts.archive_root.join("run1")).unwrap();
    fs::write(parts.archive_root.join("run1/sub"), b"in the way").unwrap();

    ArchiveJob::new(parts.spec).run();

    // The fault stays contained to its file: the task completes normally.
    assert_eq!(parts.progress.stage(), Stage::Done);
    assert_eq!(parts.progress.status(), "done");
    assert_eq!(parts.progress.value(), Some(1.0));

    // The manifest covers the surviving entries only.
    let body = fs::read_to_string(parts.metastore_root.join("run1.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let names: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"run1/a.txt"));
    assert!(names.contains(&"run1/b.txt"));

    // The reduced manifest is still uploaded and reported as the asset.
    assert_eq!(registry.uploads.lock().unwrap().len(), 1);
    assert!(parts.outcome_slot.lock().unwrap().is_some());
}

#[test]
fn test_setup_logging_tolerates_repeat_calls() {
    datacap::utils::setup_logging(false);
    datacap::utils::setup_logging(true);
}

#[test]
fn test_existing_archive_copy_counts_as_success() {
    let tmp = tempfile::tempdir().unwrap();
    let source = make_source(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let mut ledger = ChecksumLedger::new(submitter(), "");
    ledger.set_experiment(experiment());
    let parts = make_spec(
        tmp.path(),
        source,
        Arc::clone(&registry) as Arc<dyn RegistryClient>,
        Arc::new(NoIngester),
        Box::new(KeepExisting),
        ledger,
        false,
    );
    // Pre-plant one destination, as a retried task would find it.
    fs::create_dir_all(parts.archive_root.join("run1")).unwrap();
    fs::write(parts.archive_root.join("run1/a.txt"), b"aaaaa").unwrap();

    ArchiveJob::new(parts.spec).run();

    assert_eq!(parts.progress.value(), Some(1.0));
    let body = fs::read_to_string(parts.metastore_root.join("run1.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["files"].as_array().unwrap().len(), 3);
}
