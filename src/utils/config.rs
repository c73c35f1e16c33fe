//! Application configuration: tuning constants and the `datacap.toml` schema.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}

// ---- Directory authority ----

/// Vetted-directory cache tuning.
pub struct AuthorityConsts;

impl AuthorityConsts {
    /// How long a computed vetted set stays fresh.
    pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
    /// A recomputation slower than REFRESH_INTERVAL / this is logged as a warning.
    pub const SLOW_REFRESH_DIVISOR: u32 = 10;
}

// ---- Ingestion ----

/// Bounds on the wait for the external ingestion system.
pub struct IngestConsts;

impl IngestConsts {
    /// Default upper bound on one ingestion wait (seconds).
    pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
    /// Default interval between completion polls (milliseconds).
    pub const DEFAULT_POLL_MILLIS: u64 = 500;
}

// ---- Worker pool ----

/// Default number of pipeline workers when the config does not say.
pub const DEFAULT_WORKERS: usize = 4;

/// Content type of the tabular manifest. Tab-separated; that's more portable
/// than comma-separated for instrument data.
pub const TSV_CONTENT_TYPE: &str = "text/tab-separated-values";

// ---- datacap.toml ----

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_project() -> String {
    "unassigned".to_string()
}

fn default_refresh_secs() -> u64 {
    AuthorityConsts::REFRESH_INTERVAL.as_secs()
}

fn default_ingest_timeout_secs() -> u64 {
    IngestConsts::DEFAULT_TIMEOUT_SECS
}

fn default_ingest_poll_millis() -> u64 {
    IngestConsts::DEFAULT_POLL_MILLIS
}

/// Deployment configuration, loaded from `datacap.toml`.
#[derive(Clone, Debug, Deserialize)]
pub struct CaptureConfig {
    /// Managed archive tree; copies land under `<archive_root>/<project>/<instrument>/`.
    pub archive_root: PathBuf,
    /// Where finalized JSON manifests are written.
    pub metastore_root: PathBuf,
    /// Durable snapshot store: one JSON file per finished task.
    pub snapshot_root: PathBuf,
    /// Base URI of the network share the archive tree is exported on.
    pub share_root: String,
    /// Base paths whose direct children are the instrument roots.
    pub instrument_bases: Vec<PathBuf>,
    /// Roots to hide even though they sit under a base path.
    #[serde(default)]
    pub suppressed: Vec<PathBuf>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Project used when neither the instrument map nor the target names one.
    #[serde(default = "default_project")]
    pub default_project: String,
    /// Instrument name to project name.
    #[serde(default)]
    pub projects: HashMap<String, String>,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_ingest_timeout_secs")]
    pub ingest_timeout_secs: u64,
    #[serde(default = "default_ingest_poll_millis")]
    pub ingest_poll_millis: u64,
    /// Also record per-file links in the registry when ingestion succeeds.
    #[serde(default)]
    pub registry_links: bool,
}

impl CaptureConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    pub fn ingest_poll(&self) -> Duration {
        Duration::from_millis(self.ingest_poll_millis)
    }
}
