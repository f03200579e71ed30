//! Archive header read-back.
//!
//! Recovers the file table of a packed archive: names, sizes, and
//! relative order. Used by the round-trip tests and the CLI `inspect`
//! command; payload bytes are not materialized.

use std::fs;
use std::path::Path;

use super::writer::MAGIC;
use super::PackageError;

/// One entry recovered from an archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    /// Offset of the payload relative to the end of the header.
    pub data_offset: u64,
}

/// Read the file table of an archive, in declared order.
///
/// # Errors
///
/// Fails with [`PackageError::BadMagic`] for non-archive files and
/// [`PackageError::Malformed`] for truncated or inconsistent headers.
pub fn read_header(path: &Path) -> Result<Vec<ArchiveEntry>, PackageError> {
    let bytes = fs::read(path).map_err(|e| PackageError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if bytes.len() < 0x10 {
        return Err(PackageError::Malformed("header shorter than 0x10 bytes"));
    }
    if bytes[..4] != MAGIC {
        return Err(PackageError::BadMagic([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]));
    }

    let count = u32::from_le_bytes([bytes[0x4], bytes[0x5], bytes[0x6], bytes[0x7]]) as usize;
    let string_table_size =
        u32::from_le_bytes([bytes[0x8], bytes[0x9], bytes[0xA], bytes[0xB]]) as usize;

    let table_end = 0x10 + count * 0x18;
    let header_end = table_end + string_table_size;
    if bytes.len() < header_end {
        return Err(PackageError::Malformed("entry or string table truncated"));
    }
    let string_table = &bytes[table_end..header_end];

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let at = 0x10 + i * 0x18;
        let data_offset = read_u64(&bytes, at);
        let size = read_u64(&bytes, at + 8);
        let name_offset = u32::from_le_bytes([
            bytes[at + 16],
            bytes[at + 17],
            bytes[at + 18],
            bytes[at + 19],
        ]) as usize;

        let tail = string_table
            .get(name_offset..)
            .ok_or(PackageError::Malformed("name offset past string table"))?;
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(PackageError::Malformed("unterminated filename"))?;
        let name = String::from_utf8_lossy(&tail[..nul]).into_owned();

        entries.push(ArchiveEntry {
            name,
            size,
            data_offset,
        });
    }
    Ok(entries)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_header_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-archive.pkg");
        std::fs::write(&path, b"NOPE............").unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(matches!(err, PackageError::BadMagic(_)));
    }

    #[test]
    fn test_read_header_rejects_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.pkg");
        std::fs::write(&path, b"P0..").unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(matches!(err, PackageError::Malformed(_)));
    }

    #[test]
    fn test_read_header_rejects_overlong_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lie.pkg");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(matches!(err, PackageError::Malformed(_)));
    }
}
