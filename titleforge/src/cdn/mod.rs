//! CDN access: manifest resolution, content transfer, license blobs,
//! and the published latest-versions table.
//!
//! [`CdnClient`] is the high-level entry point; it speaks through the
//! [`CdnTransport`] trait so tests substitute an in-memory transport.
//! Downloads are resumable and coalesced per destination path, see
//! [`download`].

mod client;
mod digest;
mod download;
mod error;
pub(crate) mod transport;

pub use client::{CdnClient, LatestVersion, VersionTable};
pub use digest::{file_sha256, matches_sha256, verify_sha256};
pub use download::{download, DownloadOutcome, DownloadRegistry};
pub use error::{FetchError, FetchResult};
pub use transport::{
    BoxFuture, ByteStream, CdnTransport, GetResponse, HeadResponse, ReqwestTransport,
    CONTENT_ID_HEADER,
};

use std::path::PathBuf;
use std::time::Duration;

/// Environment label baked into the user agent, e.g. `lp1`.
pub const DEFAULT_ENVIRONMENT: &str = "lp1";

/// Firmware version advertised in the user agent.
pub const DEFAULT_FIRMWARE: &str = "5.1.0-3.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default write-buffer size for streamed downloads.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Connection settings for the CDN endpoints.
#[derive(Debug, Clone)]
pub struct CdnConfig {
    /// Base URL of the content delivery host.
    pub base_url: String,
    /// URL of the published latest-versions table.
    pub versions_url: String,
    /// Console device id appended to content requests.
    pub device_id: String,
    /// Path to a PEM bundle with the client certificate and key.
    pub client_cert_pem: Option<PathBuf>,
    /// Firmware version advertised to the CDN.
    pub firmware: String,
    /// CDN environment label.
    pub environment: String,
    pub timeout: Duration,
    /// Write-buffer size for streamed downloads.
    pub buffer_size: usize,
}

impl CdnConfig {
    pub fn new(base_url: impl Into<String>, versions_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            versions_url: versions_url.into(),
            device_id: String::new(),
            client_cert_pem: None,
            firmware: DEFAULT_FIRMWARE.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_client_cert(mut self, pem: PathBuf) -> Self {
        self.client_cert_pem = Some(pem);
        self
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = firmware.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// User agent string in the format the CDN expects.
    pub fn user_agent(&self) -> String {
        format!(
            "NintendoSDK Firmware/{} (platform:NX; did:{}; eid:{})",
            self.firmware, self.device_id, self.environment
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_embeds_device_and_environment() {
        let config = CdnConfig::new("http://cdn", "http://versions")
            .with_device_id("deadbeefcafe0001")
            .with_environment("lp1");
        let ua = config.user_agent();
        assert!(ua.contains("did:deadbeefcafe0001"));
        assert!(ua.contains("eid:lp1"));
        assert!(ua.contains(DEFAULT_FIRMWARE));
    }
}
