//! Resumable streaming downloads.
//!
//! Transfers are written through a buffered writer in chunk-sized
//! steps so progress reporting and cancellation both happen at chunk
//! boundaries. A partial file on disk is resumed with a `Range`
//! request; concurrent requests for the same destination path are
//! coalesced so only one transfer runs and the others wait for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::progress::ProgressJob;

use super::error::{FetchError, FetchResult};
use super::transport::CdnTransport;

/// Serializes downloads that target the same destination path.
///
/// The map entry is dropped once the last interested party releases
/// it, so the registry does not grow with download history.
#[derive(Default)]
pub struct DownloadRegistry {
    in_flight: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for a destination path, creating it on first use.
    fn guard_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, path: &Path) {
        // Two strong counts mean only the map and our clone remain.
        self.in_flight
            .remove_if(path, |_, guard| Arc::strong_count(guard) <= 2);
    }
}

/// How a completed call actually obtained the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A transfer ran (fresh or resumed).
    Transferred { resumed: bool },
    /// The file was already complete; no body was transferred.
    AlreadyComplete,
}

/// Download `url` to `dest`, resuming a partial file when present.
///
/// `expected_len` is the full size of the remote object when known;
/// it drives the restart-on-overrun check and the final completeness
/// check. Without it the response's declared `Content-Length` backs
/// the completeness check instead. `buffer_size` sets the
/// write-buffer capacity. `job`, when given, receives one `update`
/// per chunk and is polled for cancellation between chunks.
///
/// # Errors
///
/// Fails with [`FetchError::IncompleteDownload`] when the final file
/// size disagrees with `expected_len`; the partial file is left on
/// disk for a later resume.
pub async fn download(
    transport: &dyn CdnTransport,
    registry: &DownloadRegistry,
    url: &str,
    dest: &Path,
    expected_len: Option<u64>,
    buffer_size: usize,
    job: Option<&ProgressJob>,
) -> FetchResult<DownloadOutcome> {
    let guard = registry.guard_for(dest);
    let _held = guard.lock().await;
    let result = download_locked(transport, url, dest, expected_len, buffer_size, job).await;
    drop(_held);
    registry.release(dest);
    result
}

async fn download_locked(
    transport: &dyn CdnTransport,
    url: &str,
    dest: &Path,
    expected_len: Option<u64>,
    buffer_size: usize,
    job: Option<&ProgressJob>,
) -> FetchResult<DownloadOutcome> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }

    let mut existing = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    if let Some(expected) = expected_len {
        if existing == expected {
            debug!(dest = %dest.display(), len = existing, "already complete, skipping");
            if let Some(job) = job {
                job.update(existing);
            }
            return Ok(DownloadOutcome::AlreadyComplete);
        }
        if existing > expected {
            warn!(
                dest = %dest.display(),
                existing,
                expected,
                "partial file larger than remote object, restarting"
            );
            tokio::fs::remove_file(dest)
                .await
                .map_err(|e| io_err(dest, e))?;
            existing = 0;
        }
    }

    let range_start = if existing > 0 { Some(existing) } else { None };
    let response = transport.get(url, range_start).await?;

    match response.status {
        // The server confirms the local file already covers the object.
        416 => {
            debug!(dest = %dest.display(), len = existing, "server reports range satisfied");
            if let Some(job) = job {
                job.update(existing);
            }
            return Ok(DownloadOutcome::AlreadyComplete);
        }
        403 => {
            return Err(FetchError::CertificateDenied {
                url: url.to_string(),
            })
        }
        200 | 206 => {}
        status => {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            })
        }
    }

    // A 200 without Content-Range means the server ignored the Range
    // header; the body is the whole object, so start over.
    let resumed = range_start.is_some() && response.status == 206 && response.has_content_range;
    let mut written = if resumed { existing } else { 0 };

    // Without a declared size, the response's Content-Length is the
    // best available total for the completeness check. On a resume the
    // body only carries the tail.
    let expected_total = expected_len.or_else(|| {
        response
            .content_length
            .map(|remaining| if resumed { existing + remaining } else { remaining })
    });
    if expected_len.is_none() {
        if let (Some(job), Some(total)) = (job, expected_total) {
            job.set_expected(total);
        }
    }

    let file = if resumed {
        let mut file = OpenOptions::new()
            .write(true)
            .open(dest)
            .await
            .map_err(|e| io_err(dest, e))?;
        file.seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| io_err(dest, e))?;
        file
    } else {
        File::create(dest).await.map_err(|e| io_err(dest, e))?
    };
    let mut writer = BufWriter::with_capacity(buffer_size, file);

    if resumed {
        info!(dest = %dest.display(), offset = existing, "resuming transfer");
        if let Some(job) = job {
            job.update(existing);
        }
    }

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        if let Some(job) = job {
            if job.is_cancelled() {
                writer.flush().await.map_err(|e| io_err(dest, e))?;
                return Err(FetchError::Cancelled);
            }
        }
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| io_err(dest, e))?;
        written += chunk.len() as u64;
        if let Some(job) = job {
            job.update(chunk.len() as u64);
        }
    }
    writer.flush().await.map_err(|e| io_err(dest, e))?;

    if let Some(expected) = expected_total {
        if written != expected {
            return Err(FetchError::IncompleteDownload {
                path: dest.to_path_buf(),
                expected,
                actual: written,
            });
        }
    }

    debug!(dest = %dest.display(), len = written, resumed, "transfer complete");
    Ok(DownloadOutcome::Transferred { resumed })
}

fn io_err(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}
