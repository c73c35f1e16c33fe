//! Directory whitelisting: the sole decision point for which parts of the
//! filesystem an archival request may touch.
//!
//! The vetted set is a stale-tolerant cache, not a lock: a directory vetted
//! at request time may still change on disk before its pipeline runs.

use log::warn;
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::engine::is_hidden_name;
use crate::error::CaptureError;
use crate::utils::config::{AuthorityConsts, CaptureConfig};

struct VettedCache {
    set: BTreeSet<PathBuf>,
    refreshed: Option<Instant>,
}

pub struct DirectoryAuthority {
    bases: Vec<PathBuf>,
    suppressed: HashSet<PathBuf>,
    refresh: Duration,
    cache: Mutex<VettedCache>,
}

impl DirectoryAuthority {
    pub fn new(bases: Vec<PathBuf>, suppressed: Vec<PathBuf>, refresh: Duration) -> Self {
        Self {
            bases,
            suppressed: suppressed.into_iter().collect(),
            refresh,
            cache: Mutex::new(VettedCache {
                set: BTreeSet::new(),
                refreshed: None,
            }),
        }
    }

    pub fn from_config(cfg: &CaptureConfig) -> Self {
        Self::new(
            cfg.instrument_bases.clone(),
            cfg.suppressed.clone(),
            cfg.refresh_interval(),
        )
    }

    /// Direct child directories of every configured base, minus hidden
    /// entries and suppressed paths. An unreadable base is logged and
    /// skipped, never fatal.
    pub fn list_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        for base in &self.bases {
            let read = match std::fs::read_dir(base) {
                Ok(r) => r,
                Err(e) => {
                    warn!("cannot list instrument base {}: {e}", base.display());
                    continue;
                }
            };
            for entry in read.flatten() {
                let path = entry.path();
                if path.is_dir() && !is_hidden_name(&path) && !self.suppressed.contains(&path) {
                    roots.push(path);
                }
            }
        }
        roots.sort();
        roots
    }

    /// The cached set of direct children of all current roots, recomputed at
    /// most once per refresh interval.
    pub fn vetted_subdirectories(&self) -> BTreeSet<PathBuf> {
        let mut cache = self.cache.lock().unwrap();
        let fresh = cache
            .refreshed
            .map(|t| t.elapsed() < self.refresh)
            .unwrap_or(false);
        if !fresh {
            let started = Instant::now();
            cache.set = self.compute_subdirectories();
            cache.refreshed = Some(started);
            let took = started.elapsed();
            if took > self.refresh / AuthorityConsts::SLOW_REFRESH_DIVISOR {
                warn!(
                    "vetted-directory refresh took {took:?} (interval {:?})",
                    self.refresh
                );
            }
        }
        cache.set.clone()
    }

    fn compute_subdirectories(&self) -> BTreeSet<PathBuf> {
        let mut subdirs = BTreeSet::new();
        for root in self.list_roots() {
            let read = match std::fs::read_dir(&root) {
                Ok(r) => r,
                Err(e) => {
                    warn!("cannot list instrument root {}: {e}", root.display());
                    continue;
                }
            };
            for entry in read.flatten() {
                let path = entry.path();
                if path.is_dir() && !is_hidden_name(&path) {
                    subdirs.insert(path);
                }
            }
        }
        subdirs
    }

    /// All-or-nothing membership check: every requested path must be in the
    /// current vetted set, or the whole batch is rejected naming the
    /// offending path.
    pub fn validate(&self, requested: &[PathBuf]) -> Result<Vec<PathBuf>, CaptureError> {
        let vetted = self.vetted_subdirectories();
        for path in requested {
            if !vetted.contains(path) {
                return Err(CaptureError::Validation(format!(
                    "no such directory: {} not in {:?}",
                    path.display(),
                    vetted
                )));
            }
        }
        Ok(requested.to_vec())
    }

    /// Resolve a browse path strictly inside a root: the first component
    /// must name a root, every later component must match an on-disk child,
    /// and dot segments are rejected outright. Returns the resolved
    /// directory's children, sorted.
    pub fn resolve_listing(&self, path: &Path) -> Result<Vec<PathBuf>, CaptureError> {
        let mut components = Vec::new();
        for c in path.components() {
            match c {
                Component::Normal(name) => components.push(name.to_owned()),
                Component::CurDir | Component::ParentDir => {
                    return Err(CaptureError::Validation(format!(
                        "dot segments not allowed in listing path: {}",
                        path.display()
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {}
            }
        }
        let Some((first, rest)) = components.split_first() else {
            return Err(CaptureError::Validation("empty listing path".to_string()));
        };

        let mut current = self
            .list_roots()
            .into_iter()
            .find(|r| r.file_name() == Some(first.as_os_str()))
            .ok_or_else(|| {
                CaptureError::Validation(format!(
                    "no such root: {}",
                    first.to_string_lossy()
                ))
            })?;

        for component in rest {
            let mut matched = None;
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                if entry.file_name() == *component && entry.path().is_dir() {
                    matched = Some(entry.path());
                    break;
                }
            }
            current = matched.ok_or_else(|| {
                CaptureError::Validation(format!(
                    "no such directory under {}: {}",
                    current.display(),
                    component.to_string_lossy()
                ))
            })?;
        }

        let mut listing: Vec<PathBuf> = std::fs::read_dir(&current)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| !is_hidden_name(p))
            .collect();
        listing.sort();
        Ok(listing)
    }
}
