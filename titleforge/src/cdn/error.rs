//! Error types for the CDN client.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for CDN operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur while talking to the CDN or streaming
/// content to disk.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The CDN did not return a content id for a title+version.
    #[error("no content id for title {title_id} v{version}")]
    ContentIdMissing { title_id: String, version: u32 },

    /// The CDN rejected the client certificate.
    ///
    /// Surfaced distinctly from generic network failures so callers
    /// can explain the misconfiguration instead of suggesting a retry.
    #[error("CDN rejected the client certificate ({url})")]
    CertificateDenied { url: String },

    /// Transport-level failure (connect, TLS, read).
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// Unexpected HTTP status.
    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Post-transfer size check failed; the file is retained for
    /// manual resume.
    #[error("incomplete download of {path}: expected {expected} bytes, have {actual}")]
    IncompleteDownload {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Streaming digest did not match the manifest-declared hash.
    #[error("integrity failure on {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The latest-versions table could not be fetched or decoded.
    #[error("version table unavailable: {0}")]
    VersionTable(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The transfer was cancelled at a chunk boundary.
    #[error("transfer cancelled")]
    Cancelled,
}
