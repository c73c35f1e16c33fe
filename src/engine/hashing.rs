//! File hashing utilities

use anyhow::Result;
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;

use crate::utils::config::HashingConsts;

/// Hex digests of one file under both manifest algorithms. SHA-256 is the
/// primary (content-addressing) digest, BLAKE3 the secondary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDigests {
    pub sha256: String,
    pub blake3: String,
}

/// Hash a file with SHA-256 and BLAKE3 in one pass. Uses memory-mapped I/O
/// for files above threshold, chunked reading otherwise.
pub fn digest_file(path: &Path, size: u64) -> Result<FileDigests> {
    let file = File::open(path)?;
    let mut sha = Sha256::new();
    let mut blake = blake3::Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file)? };
        sha.update(&mmap[..]);
        blake.update(&mmap[..]);
    } else {
        use std::io::Read;
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            sha.update(&buffer[..n]);
            blake.update(&buffer[..n]);
        }
    }

    Ok(FileDigests {
        sha256: format!("{:x}", sha.finalize()),
        blake3: blake.finalize().to_hex().to_string(),
    })
}

/// SHA-256 hex of an in-memory string; used for the manifest's content id.
pub fn digest_str(s: &str) -> String {
    let mut sha = Sha256::new();
    sha.update(s.as_bytes());
    format!("{:x}", sha.finalize())
}
