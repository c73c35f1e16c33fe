//! Shared task progress: stage label plus per-file operation counters.
//!
//! Written only by the task's own worker, read by any thread answering a
//! status query, so every field is an atomic. Progress is
//! `(meta + copy + link) / (3 * files)`: three counted operations per file,
//! with the link counter forced to the file count at the end of the
//! finishing pass so the value reaches 1.0 whether or not any registry
//! links were made.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};

/// Pipeline stage, in execution order. `Cancelled` and `Failed` are side
/// exits, not part of the linear sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Pending = 0,
    Listing,
    Copying,
    Ingesting,
    Registering,
    ExtractingMetadata,
    Bagging,
    Finishing,
    Done,
    Cancelled,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Listing => "listing",
            Stage::Copying => "copying",
            Stage::Ingesting => "ingesting",
            Stage::Registering => "registering",
            Stage::ExtractingMetadata => "extracting-metadata",
            Stage::Bagging => "bagging",
            Stage::Finishing => "finishing",
            Stage::Done => "done",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
        }
    }

    fn from_u8(v: u8) -> Stage {
        match v {
            1 => Stage::Listing,
            2 => Stage::Copying,
            3 => Stage::Ingesting,
            4 => Stage::Registering,
            5 => Stage::ExtractingMetadata,
            6 => Stage::Bagging,
            7 => Stage::Finishing,
            8 => Stage::Done,
            9 => Stage::Cancelled,
            10 => Stage::Failed,
            _ => Stage::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskProgress {
    stage: AtomicU8,
    file_count: AtomicUsize,
    copy_count: AtomicUsize,
    meta_count: AtomicUsize,
    link_count: AtomicUsize,
    done: AtomicBool,
    /// Epoch millis; 0 means unset.
    start_ms: AtomicI64,
    end_ms: AtomicI64,
}

impl TaskProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::SeqCst);
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::SeqCst))
    }

    /// Status label for callers: "done" wins over the stored stage so a task
    /// observed complete never reports a transient stage.
    pub fn status(&self) -> &'static str {
        if self.is_done() {
            Stage::Done.as_str()
        } else {
            self.stage().as_str()
        }
    }

    /// Fix the progress denominator. Called once by the listing stage.
    pub fn set_file_count(&self, n: usize) {
        self.file_count.store(n, Ordering::SeqCst);
    }

    pub fn file_count(&self) -> usize {
        self.file_count.load(Ordering::SeqCst)
    }

    pub fn add_copy(&self) {
        self.copy_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_meta(&self) {
        self.meta_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_link(&self) {
        self.link_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Force the link counter; the finishing pass sets it to the file count.
    pub fn set_link_count(&self, n: usize) {
        self.link_count.store(n, Ordering::SeqCst);
    }

    pub fn mark_started(&self, now_ms: i64) {
        self.start_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn mark_finished(&self, now_ms: i64) {
        self.end_ms.store(now_ms, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<i64> {
        match self.start_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn finished_at(&self) -> Option<i64> {
        match self.end_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Work estimate from 0.0 to 1.0, `None` while the file count is still
    /// unknown, exactly 1.0 once the task is done. Monotonic: the counters
    /// only grow and the denominator is fixed by the listing stage.
    pub fn value(&self) -> Option<f64> {
        if self.is_done() {
            return Some(1.0);
        }
        let files = self.file_count.load(Ordering::SeqCst);
        if files == 0 {
            return None;
        }
        let metas = self.meta_count.load(Ordering::Relaxed);
        let copies = self.copy_count.load(Ordering::Relaxed);
        let links = self.link_count.load(Ordering::Relaxed);
        Some((metas + copies + links) as f64 / (files * 3) as f64)
    }
}
