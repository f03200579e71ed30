//! Archive ("P0") serialization.
//!
//! Binary layout, all integers little-endian:
//!
//! ```text
//! 0x00  [u8; 4]  magic "P0.."
//! 0x04  u32      file count (N)
//! 0x08  u32      string-table size, padded so the whole header is a
//!                multiple of 0x10
//! 0x0C  u32      reserved = 0
//! 0x10  N x 0x18 file entries:
//!       u64 data offset (relative to end of header)
//!       u64 byte size
//!       u32 name offset (into string table)
//!       u32 reserved = 0
//! ....  string table: NUL-terminated UTF-8 names, file order
//! ....  zero padding to the declared boundary
//! ....  concatenated payloads, entry-table order
//! ```
//!
//! Packing verifies the produced file's total length equals
//! `headerSize + sum(fileSizes)` exactly; a mismatch leaves the partial
//! output in place and reports failure rather than silently truncating.
//! Packing is idempotent: an existing output of exactly the expected
//! length is reported as already complete without rewriting.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::descriptor::PackageDescriptor;
use super::PackageError;
use crate::progress::ProgressJob;

/// Archive magic tag.
pub const MAGIC: [u8; 4] = *b"P0..";

/// Fixed header prefix before the entry table.
const HEADER_PREFIX: usize = 0x10;

/// Size of one entry-table record.
const ENTRY_SIZE: usize = 0x18;

/// Chunk size for streaming payloads.
const BUFFER_SIZE: usize = 64 * 1024;

/// Result of a [`pack`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOutcome {
    /// The archive was written; total length in bytes.
    Written(u64),
    /// An archive of exactly the expected length already existed.
    AlreadyComplete(u64),
}

/// Header geometry computed from a descriptor.
struct Layout {
    names: Vec<String>,
    string_table_size: u32,
    header_size: u64,
    expected_total: u64,
}

fn layout(descriptor: &PackageDescriptor) -> Result<Layout, PackageError> {
    let files = descriptor.ordered_files();
    let mut names = Vec::with_capacity(files.len());
    for file in &files {
        let name = file
            .path
            .file_name()
            .ok_or_else(|| PackageError::InvalidSource(file.path.clone()))?
            .to_string_lossy()
            .into_owned();
        names.push(name);
    }

    let raw_table: usize = names.iter().map(|n| n.len() + 1).sum();
    let base = HEADER_PREFIX + files.len() * ENTRY_SIZE;
    let pad = (0x10 - (base + raw_table) % 0x10) % 0x10;
    let string_table_size = (raw_table + pad) as u32;
    let header_size = (base + string_table_size as usize) as u64;

    Ok(Layout {
        names,
        string_table_size,
        header_size,
        expected_total: header_size + descriptor.total_payload(),
    })
}

fn build_header(descriptor: &PackageDescriptor, layout: &Layout) -> Vec<u8> {
    let files = descriptor.ordered_files();
    let mut header = Vec::with_capacity(layout.header_size as usize);

    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&(files.len() as u32).to_le_bytes());
    header.extend_from_slice(&layout.string_table_size.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());

    let mut data_offset = 0u64;
    let mut name_offset = 0u32;
    for (file, name) in files.iter().zip(&layout.names) {
        header.extend_from_slice(&data_offset.to_le_bytes());
        header.extend_from_slice(&file.size.to_le_bytes());
        header.extend_from_slice(&name_offset.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        data_offset += file.size;
        name_offset += name.len() as u32 + 1;
    }

    for name in &layout.names {
        header.extend_from_slice(name.as_bytes());
        header.push(0);
    }
    header.resize(layout.header_size as usize, 0);
    header
}

/// Serialize a descriptor's files into a single archive at `output`.
///
/// The optional progress job is updated once per streamed chunk and
/// its cancellation token is honored at the same boundary.
///
/// # Errors
///
/// I/O faults and length mismatches surface as [`PackageError`]; the
/// partial output file is left in place for the caller to inspect or
/// delete.
pub async fn pack(
    descriptor: &PackageDescriptor,
    output: &Path,
    job: Option<&ProgressJob>,
) -> Result<PackOutcome, PackageError> {
    let layout = layout(descriptor)?;

    if let Ok(meta) = tokio::fs::metadata(output).await {
        if meta.len() == layout.expected_total {
            debug!(output = %output.display(), "archive already complete, skipping pack");
            if let Some(job) = job {
                job.set_expected(0);
                job.finish();
            }
            return Ok(PackOutcome::AlreadyComplete(layout.expected_total));
        }
    }

    if let Some(job) = job {
        job.set_expected(descriptor.total_payload());
        job.start();
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .await
        .map_err(|e| PackageError::Io {
            path: output.to_path_buf(),
            source: e,
        })?;
    let mut writer = BufWriter::new(file);

    let header = build_header(descriptor, &layout);
    writer.write_all(&header).await.map_err(|e| PackageError::Io {
        path: output.to_path_buf(),
        source: e,
    })?;

    let mut buffer = vec![0u8; BUFFER_SIZE];
    for entry in descriptor.ordered_files() {
        let mut source = File::open(&entry.path).await.map_err(|e| PackageError::Io {
            path: entry.path.clone(),
            source: e,
        })?;
        loop {
            let read = source.read(&mut buffer).await.map_err(|e| PackageError::Io {
                path: entry.path.clone(),
                source: e,
            })?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| PackageError::Io {
                    path: output.to_path_buf(),
                    source: e,
                })?;
            if let Some(job) = job {
                job.update(read as u64);
                if job.is_cancelled() {
                    return Err(PackageError::Cancelled);
                }
            }
        }
    }

    writer.flush().await.map_err(|e| PackageError::Io {
        path: output.to_path_buf(),
        source: e,
    })?;
    drop(writer);

    let actual = tokio::fs::metadata(output)
        .await
        .map_err(|e| PackageError::Io {
            path: output.to_path_buf(),
            source: e,
        })?
        .len();
    if actual != layout.expected_total {
        if let Some(job) = job {
            job.fail();
        }
        return Err(PackageError::LengthMismatch {
            expected: layout.expected_total,
            actual,
        });
    }

    if let Some(job) = job {
        job.finish();
    }
    info!(output = %output.display(), bytes = actual, "archive packed");
    Ok(PackOutcome::Written(actual))
}

#[cfg(test)]
mod tests {
    use super::super::descriptor::PackageRole;
    use super::super::reader::read_header;
    use super::*;
    use crate::manifest::ContentKind;
    use crate::progress::JobStatus;
    use crate::title::TitleId;
    use tempfile::TempDir;

    fn descriptor_with(dir: &TempDir, files: &[(&str, PackageRole, &[u8])]) -> PackageDescriptor {
        let id = TitleId::from_hex("0100000000010000").unwrap();
        let mut desc = PackageDescriptor::new(id, 0);
        for (name, role, contents) in files {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            desc.push(*role, path, contents.len() as u64);
        }
        desc
    }

    #[tokio::test]
    async fn test_pack_round_trip() {
        let dir = TempDir::new().unwrap();
        let desc = descriptor_with(
            &dir,
            &[
                ("a.cert", PackageRole::Certificate, b"certificate-bytes"),
                ("a.tik", PackageRole::Ticket, b"ticket"),
                (
                    "prog.bin",
                    PackageRole::Content(ContentKind::Program),
                    &[0xAAu8; 1000],
                ),
            ],
        );
        let output = dir.path().join("out.pkg");

        let outcome = pack(&desc, &output, None).await.unwrap();
        let total = match outcome {
            PackOutcome::Written(n) => n,
            other => panic!("unexpected outcome {other:?}"),
        };

        let entries = read_header(&output).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "a.cert");
        assert_eq!(entries[0].size, 17);
        assert_eq!(entries[1].name, "a.tik");
        assert_eq!(entries[1].size, 6);
        assert_eq!(entries[2].name, "prog.bin");
        assert_eq!(entries[2].size, 1000);

        assert_eq!(std::fs::metadata(&output).unwrap().len(), total);
    }

    #[tokio::test]
    async fn test_pack_header_alignment() {
        let dir = TempDir::new().unwrap();
        let desc = descriptor_with(&dir, &[("x.bin", PackageRole::Content(ContentKind::Data), b"abc")]);
        let output = dir.path().join("out.pkg");
        pack(&desc, &output, None).await.unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[..4], &MAGIC);
        let string_table_size =
            u32::from_le_bytes([bytes[0x8], bytes[0x9], bytes[0xA], bytes[0xB]]) as usize;
        assert_eq!((HEADER_PREFIX + ENTRY_SIZE + string_table_size) % 0x10, 0);
    }

    #[tokio::test]
    async fn test_pack_idempotent() {
        let dir = TempDir::new().unwrap();
        let desc = descriptor_with(
            &dir,
            &[("a.cert", PackageRole::Certificate, &[0x11u8; 64])],
        );
        let output = dir.path().join("out.pkg");

        let first = pack(&desc, &output, None).await.unwrap();
        let first_bytes = std::fs::read(&output).unwrap();

        let second = pack(&desc, &output, None).await.unwrap();
        let second_bytes = std::fs::read(&output).unwrap();

        assert!(matches!(first, PackOutcome::Written(_)));
        assert!(matches!(second, PackOutcome::AlreadyComplete(_)));
        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn test_pack_reports_progress() {
        let dir = TempDir::new().unwrap();
        let desc = descriptor_with(
            &dir,
            &[("a.bin", PackageRole::Content(ContentKind::Program), &[0u8; 500])],
        );
        let output = dir.path().join("out.pkg");

        let job = ProgressJob::new(0);
        pack(&desc, &output, Some(&job)).await.unwrap();
        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(job.completed(), 500);
    }

    #[tokio::test]
    async fn test_pack_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let id = TitleId::from_hex("0100000000010000").unwrap();
        let mut desc = PackageDescriptor::new(id, 0);
        desc.push(
            PackageRole::Certificate,
            dir.path().join("does-not-exist.cert"),
            10,
        );
        let output = dir.path().join("out.pkg");

        let err = pack(&desc, &output, None).await.unwrap_err();
        assert!(matches!(err, PackageError::Io { .. }));
    }

    #[tokio::test]
    async fn test_pack_detects_size_lie() {
        // A descriptor claiming the wrong size must surface a length
        // mismatch and leave the partial output in place.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, [0u8; 100]).unwrap();

        let id = TitleId::from_hex("0100000000010000").unwrap();
        let mut desc = PackageDescriptor::new(id, 0);
        desc.push(PackageRole::Content(ContentKind::Program), path, 200);

        let output = dir.path().join("out.pkg");
        let err = pack(&desc, &output, None).await.unwrap_err();
        assert!(matches!(err, PackageError::LengthMismatch { .. }));
        assert!(output.exists());
    }
}
