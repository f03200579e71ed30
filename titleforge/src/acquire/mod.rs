//! Acquisition coordination.
//!
//! The [`Coordinator`] turns a title+version into a working directory
//! full of verified artifacts and a [`PackageDescriptor`] ready for
//! packaging. One acquisition runs per (working directory, title,
//! version) at a time; overall parallelism is bounded by an admission
//! gate sized to the host CPU count by default.
//!
//! The decrypt step runs out of process through the [`Decryptor`]
//! seam; icon and region extraction failures are logged and skipped
//! rather than aborting the acquisition.

mod decrypt;
mod error;
mod locks;

pub use decrypt::{CommandDecryptor, DecryptError, Decryptor};
pub use error::{AcquireError, AcquireFailure};
pub use locks::{AcquisitionGuard, LockRegistry};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cdn::CdnClient;
use crate::license::{
    self, recover_content_key, slice_license_blob, LicenseOutcome, LicenseTemplates,
};
use crate::manifest::{
    render_xml, ContentKind, Manifest, HEADER_CACHE_SUFFIX, META_CACHE_SUFFIX,
};
use crate::package::naming;
use crate::package::{PackageDescriptor, PackageRole};
use crate::progress::ProgressJob;
use crate::title::Title;

/// Subdirectory for transient decrypt output inside a working dir.
const SCRATCH_DIR: &str = ".scratch";

/// Filename of the decrypted section header blob.
const SECTION_HEADER_NAME: &str = "Header.bin";

/// Filename of the decrypted control properties blob.
const CONTROL_DATA_NAME: &str = "control.dat";

/// Length of the display-name field at the head of control data.
const CONTROL_NAME_LEN: usize = 0x200;

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Orchestrates manifest retrieval, content download, license
/// synthesis, and metadata extraction for one title+version.
pub struct Coordinator {
    cdn: CdnClient,
    decryptor: Arc<dyn Decryptor>,
    locks: LockRegistry,
    gate: Arc<Semaphore>,
    templates_dir: Option<PathBuf>,
}

impl Coordinator {
    pub fn new(cdn: CdnClient, decryptor: Arc<dyn Decryptor>) -> Self {
        Self {
            cdn,
            decryptor,
            locks: LockRegistry::new(),
            gate: Arc::new(Semaphore::new(default_parallelism())),
            templates_dir: None,
        }
    }

    /// Bound the number of concurrently in-flight acquisitions.
    pub fn with_parallelism(mut self, permits: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    /// Directory holding the ticket/certificate templates.
    pub fn with_templates_dir(mut self, dir: PathBuf) -> Self {
        self.templates_dir = Some(dir);
        self
    }

    /// Acquire one title version into `working_dir`.
    ///
    /// Produces the descriptor of everything downloaded and
    /// synthesized; the caller decides whether to package it. When
    /// `include_manifest` is set, the manifest blob and its XML
    /// projection are scheduled for packaging too.
    ///
    /// On failure the working directory's partial files are left in
    /// place so a retry can resume.
    pub async fn acquire(
        &self,
        title: &Title,
        version: u32,
        working_dir: &Path,
        include_manifest: bool,
        job: Option<&ProgressJob>,
    ) -> Result<PackageDescriptor, AcquireError> {
        // The gate is never closed; a closed gate means shutdown.
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(AcquireError::new(
                    title.id,
                    version,
                    AcquireFailure::Cancelled,
                ))
            }
        };
        let _guard = self.locks.acquire(working_dir, title.id, version).await;

        info!(title_id = %title.id, version, dir = %working_dir.display(), "starting acquisition");
        let result = self
            .acquire_locked(title, version, working_dir, include_manifest, job)
            .await
            .map_err(|failure| AcquireError::new(title.id, version, failure));

        match (&result, job) {
            (Ok(_), Some(job)) => job.finish(),
            (Err(e), Some(job)) if !e.is_cancelled() => job.fail(),
            _ => {}
        }
        result
    }

    /// Predict the total payload bytes an acquisition would download.
    ///
    /// Runs under the same lock as [`acquire`](Self::acquire) so the
    /// estimate never races a concurrent acquisition of the same
    /// title+version.
    pub async fn estimate_size(
        &self,
        title: &Title,
        version: u32,
        working_dir: &Path,
    ) -> Result<u64, AcquireError> {
        let _guard = self.locks.acquire(working_dir, title.id, version).await;
        let (manifest, _) = self
            .obtain_manifest(title, version, working_dir)
            .await
            .map_err(|failure| AcquireError::new(title.id, version, failure))?;
        Ok(manifest.payload_size())
    }

    async fn acquire_locked(
        &self,
        title: &Title,
        version: u32,
        working_dir: &Path,
        include_manifest: bool,
        job: Option<&ProgressJob>,
    ) -> Result<PackageDescriptor, AcquireFailure> {
        tokio::fs::create_dir_all(working_dir).await?;

        let (manifest, content_id) = self.obtain_manifest(title, version, working_dir).await?;
        if let Some(job) = job {
            job.set_expected(manifest.payload_size());
            job.start();
        }

        let mut descriptor = PackageDescriptor::new(title.id, version);
        descriptor.title_name = title.name.clone();

        // Every non-Meta entry becomes a verified content blob on disk.
        for entry in manifest.entries() {
            if entry.kind == ContentKind::Meta {
                continue;
            }
            if job.is_some_and(|j| j.is_cancelled()) {
                return Err(AcquireFailure::Cancelled);
            }
            let dest = working_dir.join(naming::content_filename(&entry.id));
            self.cdn
                .download_content_verified(&entry.id, &dest, entry.size, &entry.hash, job)
                .await?;
            descriptor.push(PackageRole::Content(entry.kind), dest, entry.size);
        }

        let rights = license::rights_id(title.id, manifest.master_key_revision);
        let licenses = self
            .license_artifacts(title, working_dir, &rights, manifest.master_key_revision)
            .await?;
        if let Some(path) = licenses.certificate {
            let size = file_len(&path).await?;
            descriptor.push(PackageRole::Certificate, path, size);
        }
        if let Some(path) = licenses.ticket {
            let size = file_len(&path).await?;
            descriptor.push(PackageRole::Ticket, path, size);
        }

        // Icon and region extraction is best-effort: a failed decrypt
        // loses cosmetics, not the acquisition.
        for entry in manifest.entries() {
            let needs_extraction = matches!(
                entry.kind,
                ContentKind::Control | ContentKind::LegalInformation
            );
            if !needs_extraction {
                continue;
            }
            match self
                .extract_metadata(title, working_dir, &entry.id, entry.kind, &mut descriptor)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    warn!(
                        title_id = %title.id,
                        content_id = entry.id,
                        kind = entry.kind.as_str(),
                        error = %e,
                        "metadata extraction failed, continuing without it"
                    );
                }
            }
        }

        if include_manifest {
            let blob = working_dir.join(naming::manifest_filename(&content_id));
            if blob.exists() {
                let size = file_len(&blob).await?;
                descriptor.push(PackageRole::Manifest, blob, size);
            }
            let xml = working_dir.join(naming::manifest_xml_filename(&content_id));
            if xml.exists() {
                let size = file_len(&xml).await?;
                descriptor.push(PackageRole::ManifestXml, xml, size);
            }
        }

        info!(
            title_id = %title.id,
            version,
            files = descriptor.len(),
            bytes = descriptor.total_payload(),
            "acquisition complete"
        );
        Ok(descriptor)
    }

    /// Reuse a cached decrypted manifest or fetch and decrypt a fresh
    /// one. Returns the manifest and its content id.
    async fn obtain_manifest(
        &self,
        title: &Title,
        version: u32,
        working_dir: &Path,
    ) -> Result<(Manifest, String), AcquireFailure> {
        if let Some((manifest, meta_path)) = Manifest::find_cached(working_dir, title.id, version)
        {
            if let Some(content_id) = cache_stem(&meta_path) {
                let xml_path = working_dir.join(naming::manifest_xml_filename(&content_id));
                if !xml_path.exists() {
                    tokio::fs::write(&xml_path, render_xml(&manifest)).await?;
                }
                return Ok((manifest, content_id));
            }
        }

        let content_id = self
            .cdn
            .resolve_manifest_content_id(title.id, version)
            .await?;
        let blob = working_dir.join(naming::manifest_filename(&content_id));
        self.cdn.download_manifest(&content_id, &blob, None).await?;

        let scratch = working_dir.join(SCRATCH_DIR).join(&content_id);
        let decrypted = self.decrypt_manifest(&blob, &scratch).await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        let (meta, header) = decrypted?;

        let manifest = Manifest::parse(&meta, &header)?;
        tokio::fs::write(
            working_dir.join(format!("{content_id}{META_CACHE_SUFFIX}")),
            &meta,
        )
        .await?;
        tokio::fs::write(
            working_dir.join(format!("{content_id}{HEADER_CACHE_SUFFIX}")),
            &header,
        )
        .await?;
        tokio::fs::write(
            working_dir.join(naming::manifest_xml_filename(&content_id)),
            render_xml(&manifest),
        )
        .await?;

        debug!(
            title_id = %manifest.id,
            version = manifest.version,
            entries = manifest.entries().len(),
            content_id,
            "manifest parsed"
        );
        Ok((manifest, content_id))
    }

    /// Decrypt a manifest blob and read back its meta and header
    /// sections. The decrypt output directory holds `Header.bin` plus
    /// exactly one other file, which is the meta blob.
    async fn decrypt_manifest(
        &self,
        blob: &Path,
        scratch: &Path,
    ) -> Result<(Vec<u8>, Vec<u8>), AcquireFailure> {
        self.decryptor.decrypt(blob, scratch, None).await?;

        let header = tokio::fs::read(scratch.join(SECTION_HEADER_NAME)).await?;

        let mut listing = tokio::fs::read_dir(scratch).await?;
        let mut meta_path = None;
        while let Some(entry) = listing.next_entry().await? {
            if entry.file_name() != SECTION_HEADER_NAME {
                meta_path = Some(entry.path());
            }
        }
        let meta_path =
            meta_path.ok_or_else(|| DecryptError::EmptyOutput(scratch.to_path_buf()))?;
        let meta = tokio::fs::read(&meta_path).await?;
        Ok((meta, header))
    }

    /// Produce (or reuse) the ticket and certificate for a title.
    async fn license_artifacts(
        &self,
        title: &Title,
        working_dir: &Path,
        rights: &str,
        master_key_revision: u8,
    ) -> Result<LicenseOutcome, AcquireFailure> {
        if title.is_update() {
            let ticket_path = working_dir.join(naming::ticket_filename(rights));
            let cert_path = working_dir.join(naming::certificate_filename(rights));
            if ticket_path.exists() && cert_path.exists() {
                return Ok(LicenseOutcome {
                    ticket: Some(ticket_path),
                    certificate: Some(cert_path),
                });
            }
            let blob_path = working_dir.join(SCRATCH_DIR).join(format!("{rights}.lic"));
            self.cdn.fetch_license_blob(rights, &blob_path, None).await?;
            let blob = tokio::fs::read(&blob_path).await?;
            let outcome = slice_license_blob(working_dir, rights, &blob)?;
            let _ = tokio::fs::remove_file(&blob_path).await;
            return Ok(outcome);
        }

        let templates = match &self.templates_dir {
            Some(dir) => LicenseTemplates::load(dir)?,
            None => LicenseTemplates::default(),
        };
        let key = match title.decoded_key() {
            Some(key) => Some(key),
            None => recover_content_key(&working_dir.join(naming::ticket_filename(rights)))?,
        };
        Ok(license::generate_from_templates(
            working_dir,
            rights,
            &templates,
            key,
            master_key_revision,
        )?)
    }

    /// Decrypt a Control or LegalInformation blob and pull out icons,
    /// region XML, and the display name. Scratch output is removed on
    /// every path.
    async fn extract_metadata(
        &self,
        title: &Title,
        working_dir: &Path,
        content_id: &str,
        kind: ContentKind,
        descriptor: &mut PackageDescriptor,
    ) -> Result<(), AcquireFailure> {
        let blob = working_dir.join(naming::content_filename(content_id));
        let scratch = working_dir.join(SCRATCH_DIR).join(content_id);

        let key = title.key.as_deref().filter(|_| title.has_valid_key());
        let result = self
            .extract_into(working_dir, &blob, &scratch, key, kind, descriptor)
            .await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        result
    }

    async fn extract_into(
        &self,
        working_dir: &Path,
        blob: &Path,
        scratch: &Path,
        key: Option<&str>,
        kind: ContentKind,
        descriptor: &mut PackageDescriptor,
    ) -> Result<(), AcquireFailure> {
        self.decryptor.decrypt(blob, scratch, key).await?;

        let mut listing = tokio::fs::read_dir(scratch).await?;
        while let Some(entry) = listing.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let source = entry.path();
            match kind {
                ContentKind::Control if name.ends_with(".jpg") => {
                    let dest = working_dir.join(&name);
                    tokio::fs::copy(&source, &dest).await?;
                    let size = file_len(&dest).await?;
                    descriptor.push(PackageRole::Icon, dest, size);
                }
                ContentKind::Control if name == CONTROL_DATA_NAME => {
                    if descriptor.title_name.is_none() {
                        if let Some(title_name) = read_display_name(&source).await? {
                            debug!(name = %title_name, "display name recovered from control data");
                            descriptor.title_name = Some(title_name);
                        }
                    }
                }
                ContentKind::LegalInformation if name.ends_with(".xml") => {
                    tokio::fs::copy(&source, working_dir.join(&name)).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Display name from the fixed-width field at the head of control
/// data; empty or non-UTF-8 fields yield `None`.
async fn read_display_name(path: &Path) -> Result<Option<String>, AcquireFailure> {
    let bytes = tokio::fs::read(path).await?;
    let field = &bytes[..bytes.len().min(CONTROL_NAME_LEN)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match std::str::from_utf8(&field[..end]) {
        Ok(name) if !name.trim().is_empty() => Ok(Some(name.trim().to_string())),
        _ => Ok(None),
    }
}

fn cache_stem(meta_path: &Path) -> Option<String> {
    meta_path
        .file_name()?
        .to_string_lossy()
        .strip_suffix(META_CACHE_SUFFIX)
        .map(str::to_string)
}

async fn file_len(path: &Path) -> Result<u64, AcquireFailure> {
    Ok(tokio::fs::metadata(path).await?.len())
}
