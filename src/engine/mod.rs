//! Engine module: hashing, content-type detection, path/URI helpers.

pub mod hashing;
pub mod mimetype;
pub mod tools;

// Re-export commonly used functions
pub use hashing::{FileDigests, digest_file, digest_str};
pub use mimetype::detect as detect_mimetype;
pub use tools::{
    is_hidden_name, is_os_hidden_file, iso8601_millis, iso8601_now, now_millis, path_relative_to,
    path_to_name, resolve_to_uri,
};
