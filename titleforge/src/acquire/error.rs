//! Acquisition error types.

use std::fmt;

use crate::cdn::FetchError;
use crate::license::LicenseError;
use crate::manifest::ManifestError;
use crate::title::TitleId;

use super::decrypt::DecryptError;

/// What failed during an acquisition.
#[derive(Debug)]
pub enum AcquireFailure {
    /// Fetching the manifest or a content blob.
    Fetch(FetchError),

    /// Decrypting a downloaded blob.
    Decrypt(DecryptError),

    /// Parsing the decrypted manifest.
    Manifest(ManifestError),

    /// Synthesizing license artifacts.
    License(LicenseError),

    /// Filesystem work in the working directory.
    Io(std::io::Error),

    /// The acquisition was cancelled.
    Cancelled,
}

/// An acquisition failure, annotated with the title and version it
/// belongs to.
#[derive(Debug)]
pub struct AcquireError {
    pub title_id: TitleId,
    pub version: u32,
    pub failure: AcquireFailure,
}

impl AcquireError {
    pub fn new(title_id: TitleId, version: u32, failure: AcquireFailure) -> Self {
        Self {
            title_id,
            version,
            failure,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, AcquireFailure::Cancelled)
            || matches!(self.failure, AcquireFailure::Fetch(FetchError::Cancelled))
    }
}

impl fmt::Display for AcquireFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireFailure::Fetch(e) => write!(f, "{}", e),
            AcquireFailure::Decrypt(e) => write!(f, "{}", e),
            AcquireFailure::Manifest(e) => write!(f, "{}", e),
            AcquireFailure::License(e) => write!(f, "{}", e),
            AcquireFailure::Io(e) => write!(f, "{}", e),
            AcquireFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acquisition of {} v{} failed: {}",
            self.title_id, self.version, self.failure
        )
    }
}

impl std::error::Error for AcquireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.failure {
            AcquireFailure::Fetch(e) => Some(e),
            AcquireFailure::Decrypt(e) => Some(e),
            AcquireFailure::Manifest(e) => Some(e),
            AcquireFailure::License(e) => Some(e),
            AcquireFailure::Io(e) => Some(e),
            AcquireFailure::Cancelled => None,
        }
    }
}

impl From<FetchError> for AcquireFailure {
    fn from(e: FetchError) -> Self {
        AcquireFailure::Fetch(e)
    }
}

impl From<DecryptError> for AcquireFailure {
    fn from(e: DecryptError) -> Self {
        AcquireFailure::Decrypt(e)
    }
}

impl From<ManifestError> for AcquireFailure {
    fn from(e: ManifestError) -> Self {
        AcquireFailure::Manifest(e)
    }
}

impl From<LicenseError> for AcquireFailure {
    fn from(e: LicenseError) -> Self {
        AcquireFailure::License(e)
    }
}

impl From<std::io::Error> for AcquireFailure {
    fn from(e: std::io::Error) -> Self {
        AcquireFailure::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_title_and_version() {
        let id = TitleId::from_hex("0100000000001000").unwrap();
        let err = AcquireError::new(id, 65536, AcquireFailure::Cancelled);
        let text = err.to_string();
        assert!(text.contains("0100000000001000"));
        assert!(text.contains("v65536"));
        assert!(text.contains("cancelled"));
    }

    #[test]
    fn test_failure_displays_on_its_own() {
        let failure = AcquireFailure::Fetch(FetchError::Cancelled);
        assert_eq!(failure.to_string(), "transfer cancelled");
        assert_eq!(AcquireFailure::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_is_cancelled_covers_fetch_cancellation() {
        let id = TitleId::from_hex("0100000000001000").unwrap();
        let err = AcquireError::new(id, 0, AcquireFailure::Fetch(FetchError::Cancelled));
        assert!(err.is_cancelled());
    }
}
