//! SHA-256 helpers for incremental content hashing.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::DownloadError;

const READ_CHUNK: usize = 64 * 1024;

/// Builds a hasher primed with the first `len` bytes of `path`.
///
/// Used when resuming: the digest must cover the whole file, not just the
/// bytes fetched by the current attempt.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the file cannot be read or is shorter
/// than `len`.
pub async fn hasher_from_prefix(path: &Path, len: u64) -> Result<Sha256, DownloadError> {
    let mut hasher = Sha256::new();
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut reader = file.take(len);
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut consumed = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        consumed += read as u64;
    }
    if consumed != len {
        return Err(DownloadError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("partial file shrank to {consumed} bytes, expected {len}"),
            ),
        ));
    }
    Ok(hasher)
}

/// Lowercase hex SHA-256 of a whole file.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the file cannot be read.
pub async fn hash_file(path: &Path) -> Result<String, DownloadError> {
    let len = tokio::fs::metadata(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?
        .len();
    Ok(to_hex(hasher_from_prefix(path, len).await?))
}

/// Lowercase hex digest of a finished hasher.
#[must_use]
pub fn to_hex(hasher: Sha256) -> String {
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prefix_then_tail_matches_whole_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.part");
        let content = b"0123456789abcdef".repeat(10_000);
        std::fs::write(&path, &content).unwrap();

        let split = 70_000u64;
        let mut hasher = hasher_from_prefix(&path, split).await.unwrap();
        #[allow(clippy::cast_possible_truncation)]
        hasher.update(&content[split as usize..]);

        assert_eq!(to_hex(hasher), hex::encode(Sha256::digest(&content)));
    }

    #[tokio::test]
    async fn test_prefix_zero_is_empty_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.part");
        std::fs::write(&path, b"ignored").unwrap();

        let hasher = hasher_from_prefix(&path, 0).await.unwrap();
        assert_eq!(
            to_hex(hasher),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_prefix_longer_than_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.part");
        std::fs::write(&path, b"short").unwrap();

        let err = hasher_from_prefix(&path, 100).await.unwrap_err();
        assert!(matches!(err, DownloadError::Io { .. }));
    }

    #[tokio::test]
    async fn test_hash_file_digests_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.jpg");
        std::fs::write(&path, b"image one").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            hex::encode(Sha256::digest(b"image one"))
        );
        assert!(hash_file(&dir.path().join("missing.jpg")).await.is_err());
    }
}
