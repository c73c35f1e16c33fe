//! Pipeline components: the archival state machine, shared progress,
//! cooperative cancellation.

pub mod archiver;
pub mod cancel;
pub mod progress;

pub use archiver::{ArchiveJob, ArchiveSpec, experiment_title, unique_manifest_path};
pub use cancel::CancelToken;
pub use progress::{Stage, TaskProgress};
