//! Path, URI, and timestamp utilities

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Relative path rendered with forward slashes, for entry names and URIs.
pub fn path_to_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            // macOS resource fork files start with ._
            _ => name.starts_with("._"),
        }
    } else {
        false
    }
}

/// True for dotfiles and OS junk; used to filter root and snapshot listings.
pub fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
        || is_os_hidden_file(path)
}

/// Resolve `part` against `base`, escaping everything a share/registry URI
/// cannot carry: alphanumerics and `/_-!.~'()*` pass through, space becomes
/// `+`, anything else is percent-encoded per UTF-8 byte.
pub fn resolve_to_uri(base: &str, part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for ch in part.chars() {
        if ch.is_ascii_alphanumeric() || "/_-!.~'()*".contains(ch) {
            out.push(ch);
        } else if ch == ' ' {
            out.push('+');
        } else {
            let mut buf = [0u8; 4];
            for b in ch.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }
    format!("{}/{}", base.trim_end_matches('/'), out)
}

/// Current time as milliseconds since the epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds as an ISO-8601 UTC string (`2016-03-01T09:30:00Z`).
pub fn iso8601_millis(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(t) => iso8601(&t),
        None => String::new(),
    }
}

pub fn iso8601(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn iso8601_now() -> String {
    iso8601(&Utc::now())
}

pub fn iso8601_system_time(t: SystemTime) -> String {
    iso8601(&DateTime::<Utc>::from(t))
}
