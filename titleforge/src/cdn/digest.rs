//! Streaming SHA-256 helpers for downloaded content.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::error::{FetchError, FetchResult};

const READ_CHUNK: usize = 64 * 1024;

/// Compute the SHA-256 digest of a file without loading it whole.
pub async fn file_sha256(path: &Path) -> FetchResult<[u8; 32]> {
    let mut file = File::open(path).await.map_err(|e| FetchError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| FetchError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Check a file against an expected digest.
///
/// # Errors
///
/// Returns [`FetchError::Integrity`] on mismatch, carrying both hex
/// digests for the log line.
pub async fn verify_sha256(path: &Path, expected: &[u8; 32]) -> FetchResult<()> {
    let actual = file_sha256(path).await?;
    if &actual != expected {
        return Err(FetchError::Integrity {
            path: path.to_path_buf(),
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

/// Whether a file already exists with the expected digest.
///
/// I/O failures (including the file not existing) report `false`
/// rather than an error; callers fall through to a fresh download.
pub async fn matches_sha256(path: &Path, expected: &[u8; 32]) -> bool {
    match file_sha256(path).await {
        Ok(actual) => &actual == expected,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn sha(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[tokio::test]
    async fn test_file_sha256_matches_one_shot_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_sha256(&path).await.unwrap(), sha(&data));
    }

    #[tokio::test]
    async fn test_verify_sha256_reports_both_digests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"payload").unwrap();

        let err = verify_sha256(&path, &[0u8; 32]).await.unwrap_err();
        match err {
            FetchError::Integrity {
                expected, actual, ..
            } => {
                assert_eq!(expected, hex::encode([0u8; 32]));
                assert_eq!(actual, hex::encode(sha(b"payload")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_matches_sha256_missing_file_is_false() {
        let dir = TempDir::new().unwrap();
        assert!(!matches_sha256(&dir.path().join("absent"), &[0u8; 32]).await);
    }
}
