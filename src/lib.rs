//! Datacap: archival pipeline for laboratory instrument data.
//!
//! Captures the files an instrument run produced, copies them into a managed
//! archive tree, computes dual-digest provenance for every file, optionally
//! hands the copy to an external ingestion system, and registers a
//! content-addressed manifest with the experiment registry. One task per
//! archival request; the [`registry::TaskRegistry`] owns task identity,
//! concurrency, and durable history across restarts.

pub mod authority;
pub mod cli;
pub mod clients;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod registry;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use authority::DirectoryAuthority;
pub use error::CaptureError;
pub use ledger::ChecksumLedger;
pub use registry::TaskRegistry;
pub use types::*;

/// Result alias used by fallible internals
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
