//! Content-manifest binary format.
//!
//! A manifest enumerates the content blobs making up one title version:
//! their ids, kinds, sizes, and SHA-256 hashes, plus title-level
//! metadata (type, version, required system version). The format is a
//! fixed little-endian layout:
//!
//! ```text
//! 0x00  u64  title id
//! 0x08  u32  version
//! 0x0C  u8   title meta kind
//! 0x0E  u16  content-table offset (from 0x20)
//! 0x10  u16  content-entry count
//! 0x18  u64  required download system version
//! 0x28  u64  required system version
//! 0x20 + offset : entries, 0x38 bytes each
//!       0x00  [u8; 32] hash
//!       0x20  [u8; 16] content id
//!       0x30  u48      size
//!       0x36  u16      content kind
//! trailing 32 bytes : digest
//! ```
//!
//! The companion section-header blob produced by the external decrypt
//! step carries the master-key revision at offset 0x220.
//!
//! Manifests are immutable once parsed; each acquisition owns the one
//! it produced.

mod xml;

pub use xml::render_xml;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::title::TitleId;

/// Byte length of one content-table entry.
const ENTRY_STRIDE: usize = 0x38;

/// Offset of the content table relative to the table-offset field's base.
const TABLE_BASE: usize = 0x20;

/// Offset of the master-key-revision byte in the companion header blob.
const HEADER_KEY_REVISION_OFFSET: usize = 0x220;

/// Suffixes for the decrypted manifest cache written to a working
/// directory after the first successful parse.
pub const META_CACHE_SUFFIX: &str = ".manifest.meta";
pub const HEADER_CACHE_SUFFIX: &str = ".manifest.hdr";

/// Errors produced while parsing a manifest blob.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The meta blob is too small for the fields it declares.
    #[error("manifest blob too short: {len} bytes, need at least {need}")]
    TooShort { len: usize, need: usize },

    /// The companion header blob is too small to carry a key revision.
    #[error("manifest header blob too short: {len} bytes")]
    HeaderTooShort { len: usize },

    /// Unrecognised title meta kind discriminant.
    #[error("unknown title meta kind 0x{0:02x}")]
    UnknownTitleKind(u8),

    /// Unrecognised content kind discriminant.
    #[error("unknown content kind 0x{0:04x}")]
    UnknownContentKind(u16),

    #[error("I/O error reading manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Title-level meta kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMetaKind {
    SystemProgram,
    SystemData,
    SystemUpdate,
    BootImagePackage,
    BootImagePackageSafe,
    Application,
    Patch,
    AddOnContent,
    Delta,
}

impl TitleMetaKind {
    fn from_raw(raw: u8) -> Result<Self, ManifestError> {
        match raw {
            0x01 => Ok(Self::SystemProgram),
            0x02 => Ok(Self::SystemData),
            0x03 => Ok(Self::SystemUpdate),
            0x04 => Ok(Self::BootImagePackage),
            0x05 => Ok(Self::BootImagePackageSafe),
            0x80 => Ok(Self::Application),
            0x81 => Ok(Self::Patch),
            0x82 => Ok(Self::AddOnContent),
            0x83 => Ok(Self::Delta),
            other => Err(ManifestError::UnknownTitleKind(other)),
        }
    }

    /// Name used in the XML projection.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemProgram => "SystemProgram",
            Self::SystemData => "SystemData",
            Self::SystemUpdate => "SystemUpdate",
            Self::BootImagePackage => "BootImagePackage",
            Self::BootImagePackageSafe => "BootImagePackageSafe",
            Self::Application => "Application",
            Self::Patch => "Patch",
            Self::AddOnContent => "AddOnContent",
            Self::Delta => "Delta",
        }
    }
}

/// Kind of an individual content blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Meta,
    Program,
    Data,
    Control,
    HtmlDocument,
    LegalInformation,
    DeltaFragment,
}

impl ContentKind {
    fn from_raw(raw: u16) -> Result<Self, ManifestError> {
        match raw {
            0 => Ok(Self::Meta),
            1 => Ok(Self::Program),
            2 => Ok(Self::Data),
            3 => Ok(Self::Control),
            4 => Ok(Self::HtmlDocument),
            5 => Ok(Self::LegalInformation),
            6 => Ok(Self::DeltaFragment),
            other => Err(ManifestError::UnknownContentKind(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meta => "Meta",
            Self::Program => "Program",
            Self::Data => "Data",
            Self::Control => "Control",
            Self::HtmlDocument => "HtmlDocument",
            Self::LegalInformation => "LegalInformation",
            Self::DeltaFragment => "DeltaFragment",
        }
    }
}

/// One content blob referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// Content id, lowercase 32-hex.
    pub id: String,
    pub kind: ContentKind,
    pub size: u64,
    pub hash: [u8; 32],
    /// Key generation required to decrypt this blob. The format keeps
    /// a single revision per title in the companion header; it is
    /// mirrored onto every entry.
    pub key_generation: u8,
}

/// A parsed, immutable content manifest for one title version.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub id: TitleId,
    pub version: u32,
    pub kind: TitleMetaKind,
    pub required_download_system_version: u64,
    pub required_system_version: u64,
    pub master_key_revision: u8,
    pub digest: [u8; 32],
    entries: Vec<ContentEntry>,
}

impl Manifest {
    /// Parse a decrypted manifest blob and its companion header blob.
    ///
    /// # Errors
    ///
    /// Fails with [`ManifestError`] if either blob is undersized or a
    /// kind discriminant is unknown.
    pub fn parse(meta: &[u8], header: &[u8]) -> Result<Self, ManifestError> {
        const FIXED_LEN: usize = 0x30;
        if meta.len() < FIXED_LEN + 32 {
            return Err(ManifestError::TooShort {
                len: meta.len(),
                need: FIXED_LEN + 32,
            });
        }
        if header.len() <= HEADER_KEY_REVISION_OFFSET {
            return Err(ManifestError::HeaderTooShort { len: header.len() });
        }

        let id = TitleId::from_u64(read_u64(meta, 0x0));
        let version = read_u32(meta, 0x8);
        let kind = TitleMetaKind::from_raw(meta[0xC])?;
        let table_offset = read_u16(meta, 0xE) as usize;
        let entry_count = read_u16(meta, 0x10) as usize;
        let required_download_system_version = read_u64(meta, 0x18);
        let required_system_version = read_u64(meta, 0x28);
        let master_key_revision = header[HEADER_KEY_REVISION_OFFSET];

        let table_start = TABLE_BASE + table_offset;
        let need = table_start + entry_count * ENTRY_STRIDE + 32;
        if meta.len() < need {
            return Err(ManifestError::TooShort {
                len: meta.len(),
                need,
            });
        }

        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let at = table_start + i * ENTRY_STRIDE;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&meta[at..at + 32]);
            let id = hex::encode(&meta[at + 0x20..at + 0x30]);
            let size = read_u48(meta, at + 0x30);
            let kind = ContentKind::from_raw(read_u16(meta, at + 0x36))?;
            entries.push(ContentEntry {
                id,
                kind,
                size,
                hash,
                key_generation: master_key_revision,
            });
        }

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&meta[meta.len() - 32..]);

        Ok(Self {
            id,
            version,
            kind,
            required_download_system_version,
            required_system_version,
            master_key_revision,
            digest,
            entries,
        })
    }

    /// Entries matching `filter`, or all entries when no filter is given.
    ///
    /// Order is the manifest's own table order.
    pub fn parse_content(&self, filter: Option<ContentKind>) -> Vec<&ContentEntry> {
        self.entries
            .iter()
            .filter(|e| filter.map_or(true, |k| e.kind == k))
            .collect()
    }

    /// All entries, in table order.
    pub fn entries(&self) -> &[ContentEntry] {
        &self.entries
    }

    /// Sum of the declared sizes of all non-Meta entries.
    pub fn payload_size(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.kind != ContentKind::Meta)
            .map(|e| e.size)
            .sum()
    }

    /// Look for a cached decrypted manifest in `dir` matching `id` and
    /// `version`.
    ///
    /// The acquisition coordinator writes the decrypted meta and header
    /// blobs next to the downloaded artifacts; a later acquisition of
    /// the same title+version reuses them without touching the network.
    /// Unreadable or mismatching cache files are skipped, never fatal.
    pub fn find_cached(dir: &Path, id: TitleId, version: u32) -> Option<(Manifest, PathBuf)> {
        let listing = fs::read_dir(dir).ok()?;
        for entry in listing.flatten() {
            let path = entry.path();
            let name = path.file_name()?.to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(META_CACHE_SUFFIX) else {
                continue;
            };
            let header_path = dir.join(format!("{stem}{HEADER_CACHE_SUFFIX}"));
            let (Ok(meta), Ok(header)) = (fs::read(&path), fs::read(&header_path)) else {
                continue;
            };
            match Manifest::parse(&meta, &header) {
                Ok(manifest) if manifest.id == id && manifest.version == version => {
                    debug!(manifest = %path.display(), "reusing cached manifest");
                    return Some((manifest, path));
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(manifest = %path.display(), error = %e, "ignoring unparseable cached manifest");
                    continue;
                }
            }
        }
        None
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u48(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..6].copy_from_slice(&buf[at..at + 6]);
    u64::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
