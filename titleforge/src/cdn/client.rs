//! High-level CDN client.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::progress::ProgressJob;
use crate::title::TitleId;

use super::digest::{matches_sha256, verify_sha256};
use super::download::{download, DownloadOutcome, DownloadRegistry};
use super::error::{FetchError, FetchResult};
use super::transport::{CdnTransport, ReqwestTransport};
use super::CdnConfig;

/// Latest published state of one title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestVersion {
    pub version: u32,
    pub required_version: u32,
}

/// The published latest-versions table, keyed by base title id.
///
/// The table publishes update ids; lookups normalize any role of a
/// title id down to its base entry.
#[derive(Debug, Clone, Default)]
pub struct VersionTable {
    entries: HashMap<u64, LatestVersion>,
}

impl VersionTable {
    /// Latest entry for any id belonging to the title, if published.
    pub fn lookup(&self, id: TitleId) -> Option<LatestVersion> {
        self.entries.get(&(id.as_u64() & !0xFFF)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Deserialize)]
struct VersionListDocument {
    titles: Vec<VersionListEntry>,
}

#[derive(Deserialize)]
struct VersionListEntry {
    id: String,
    version: u32,
    #[serde(default)]
    required_version: u32,
}

/// Client for the content delivery endpoints.
///
/// Cheap to clone; the transport and the in-flight download registry
/// are shared behind `Arc`.
#[derive(Clone)]
pub struct CdnClient {
    config: CdnConfig,
    transport: Arc<dyn CdnTransport>,
    registry: Arc<DownloadRegistry>,
}

impl CdnClient {
    /// Build a client with the production HTTP transport.
    pub fn new(config: CdnConfig) -> FetchResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build a client over an injected transport.
    pub fn with_transport(config: CdnConfig, transport: Arc<dyn CdnTransport>) -> Self {
        Self {
            config,
            transport,
            registry: Arc::new(DownloadRegistry::new()),
        }
    }

    fn manifest_head_url(&self, title_id: TitleId, version: u32) -> String {
        format!(
            "{}/t/a/{}/{}?device_id={}",
            self.config.base_url, title_id, version, self.config.device_id
        )
    }

    fn meta_content_url(&self, content_id: &str) -> String {
        format!(
            "{}/c/a/{}?device_id={}",
            self.config.base_url, content_id, self.config.device_id
        )
    }

    fn content_url(&self, content_id: &str) -> String {
        format!(
            "{}/c/c/{}?device_id={}",
            self.config.base_url, content_id, self.config.device_id
        )
    }

    fn license_head_url(&self, rights_id: &str) -> String {
        format!("{}/r/t/{}", self.config.base_url, rights_id)
    }

    fn license_content_url(&self, content_id: &str) -> String {
        format!("{}/c/t/{}", self.config.base_url, content_id)
    }

    /// Resolve the manifest content id for a title+version.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::ContentIdMissing`] when the CDN answers
    /// without the content-id header (typically an unpublished
    /// version), and [`FetchError::CertificateDenied`] on 403.
    pub async fn resolve_manifest_content_id(
        &self,
        title_id: TitleId,
        version: u32,
    ) -> FetchResult<String> {
        let url = self.manifest_head_url(title_id, version);
        let response = self.transport.head(&url).await?;
        match response.status {
            403 => return Err(FetchError::CertificateDenied { url }),
            200 => {}
            status => return Err(FetchError::Status { url, status }),
        }
        let content_id = response.content_id.ok_or(FetchError::ContentIdMissing {
            title_id: title_id.to_string(),
            version,
        })?;
        debug!(%title_id, version, content_id, "resolved manifest content id");
        Ok(content_id)
    }

    /// Download a manifest blob (encrypted, as served) to `dest`.
    pub async fn download_manifest(
        &self,
        content_id: &str,
        dest: &Path,
        job: Option<&ProgressJob>,
    ) -> FetchResult<DownloadOutcome> {
        let url = self.meta_content_url(content_id);
        download(
            &*self.transport,
            &self.registry,
            &url,
            dest,
            None,
            self.config.buffer_size,
            job,
        )
        .await
    }

    /// Download a regular content blob to `dest`, resuming partials.
    pub async fn download_content(
        &self,
        content_id: &str,
        dest: &Path,
        expected_len: Option<u64>,
        job: Option<&ProgressJob>,
    ) -> FetchResult<DownloadOutcome> {
        let url = self.content_url(content_id);
        download(
            &*self.transport,
            &self.registry,
            &url,
            dest,
            expected_len,
            self.config.buffer_size,
            job,
        )
        .await
    }

    /// Download a content blob and verify its SHA-256 digest.
    ///
    /// A file already on disk with the right digest is not fetched at
    /// all. On a digest mismatch the file is deleted and the transfer
    /// retried once from scratch before the failure is surfaced.
    pub async fn download_content_verified(
        &self,
        content_id: &str,
        dest: &Path,
        expected_len: u64,
        expected_hash: &[u8; 32],
        job: Option<&ProgressJob>,
    ) -> FetchResult<DownloadOutcome> {
        if matches_sha256(dest, expected_hash).await {
            debug!(dest = %dest.display(), "digest already valid, skipping transfer");
            if let Some(job) = job {
                job.update(expected_len);
            }
            return Ok(DownloadOutcome::AlreadyComplete);
        }

        let outcome = self
            .download_content(content_id, dest, Some(expected_len), job)
            .await?;
        match verify_sha256(dest, expected_hash).await {
            Ok(()) => Ok(outcome),
            Err(FetchError::Integrity {
                expected, actual, ..
            }) => {
                warn!(
                    dest = %dest.display(),
                    expected,
                    actual,
                    "digest mismatch, retrying transfer"
                );
                tokio::fs::remove_file(dest)
                    .await
                    .map_err(|e| FetchError::Io {
                        path: dest.to_path_buf(),
                        source: e,
                    })?;
                // The discarded attempt credited a full object's worth
                // of bytes; the retry counts them again.
                if let Some(job) = job {
                    job.retract(expected_len);
                }
                let outcome = self
                    .download_content(content_id, dest, Some(expected_len), job)
                    .await?;
                verify_sha256(dest, expected_hash).await?;
                Ok(outcome)
            }
            Err(other) => Err(other),
        }
    }

    /// Fetch the common license blob for a rights id.
    ///
    /// The blob is located with a HEAD against the rights endpoint and
    /// then streamed like any other content.
    pub async fn fetch_license_blob(
        &self,
        rights_id: &str,
        dest: &Path,
        job: Option<&ProgressJob>,
    ) -> FetchResult<DownloadOutcome> {
        let head_url = self.license_head_url(rights_id);
        let response = self.transport.head(&head_url).await?;
        match response.status {
            403 => {
                return Err(FetchError::CertificateDenied { url: head_url });
            }
            200 => {}
            status => {
                return Err(FetchError::Status {
                    url: head_url,
                    status,
                })
            }
        }
        let content_id = response.content_id.ok_or(FetchError::ContentIdMissing {
            title_id: rights_id.to_string(),
            version: 0,
        })?;
        info!(rights_id, content_id, "fetching license blob");
        let url = self.license_content_url(&content_id);
        download(
            &*self.transport,
            &self.registry,
            &url,
            dest,
            response.content_length,
            self.config.buffer_size,
            job,
        )
        .await
    }

    /// Fetch and decode the published latest-versions table.
    pub async fn latest_versions(&self) -> FetchResult<VersionTable> {
        let url = &self.config.versions_url;
        let response = self.transport.get(url, None).await?;
        if response.status != 200 {
            return Err(FetchError::VersionTable(format!(
                "HTTP {} from {url}",
                response.status
            )));
        }

        let mut bytes = Vec::new();
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        let document: VersionListDocument = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::VersionTable(format!("malformed version list: {e}")))?;

        let mut entries = HashMap::with_capacity(document.titles.len());
        for entry in document.titles {
            let id = match TitleId::from_hex(&entry.id) {
                Ok(id) => id,
                Err(_) => {
                    warn!(id = entry.id, "skipping unparseable version list entry");
                    continue;
                }
            };
            entries.insert(
                id.as_u64() & !0xFFF,
                LatestVersion {
                    version: entry.version,
                    required_version: entry.required_version,
                },
            );
        }
        debug!(titles = entries.len(), "loaded version table");
        Ok(VersionTable { entries })
    }
}
