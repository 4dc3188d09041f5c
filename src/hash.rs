//! # Hashing
//!
//! Streaming SHA-256 over files with a fixed read buffer. Hashes travel the
//! wire as lowercase hex digests.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::HTTP_CHUNK_SIZE;
use crate::error::Result;

/// Streaming SHA-256 of an entire file, as a lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HTTP_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A hasher pre-fed with the first `len` bytes of `path` (or the whole file
/// if shorter). Used to seed full-file verification when a transfer resumes
/// from an offset: the prefix already on disk is hashed here, the rest is
/// fed as it streams.
pub fn prefix_hasher(path: &Path, len: u64) -> Result<Sha256> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut remaining = len;
    let mut buf = vec![0u8; HTTP_CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hasher)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty string.
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), EMPTY_SHA256);
    }

    #[test]
    fn test_sha256_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_missing_file_is_io_error() {
        let err = sha256_file(Path::new("/nonexistent/definitely-not-here")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_prefix_hasher_matches_full_hash_when_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &payload).unwrap();

        // Hash the first half from disk, feed the second half incrementally.
        let split = payload.len() / 2;
        let mut hasher = prefix_hasher(&path, split as u64).unwrap();
        hasher.update(&payload[split..]);
        assert_eq!(hex::encode(hasher.finalize()), sha256_file(&path).unwrap());
    }
}
