//! Error taxonomy for the request-facing surface.
//!
//! Everything that happens inside a running pipeline is contained there and
//! logged; only request-time failures reach callers as typed errors.

use thiserror::Error;

/// Errors surfaced by [`TaskRegistry`](crate::registry::TaskRegistry) and
/// [`DirectoryAuthority`](crate::authority::DirectoryAuthority).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Bad request-time input: a directory outside the vetted whitelist,
    /// no candidate directory on disk, a malformed browse path.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task id is not known to the registry.
    #[error("no such task: {0}")]
    NotFound(String),

    /// The task was known once but has already been removed.
    #[error("task already removed: {0}")]
    Gone(String),

    /// An I/O problem answering the request itself (unreadable root during
    /// a browse, for example). Distinct from validation failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
