//! Package descriptor: the ordered input set for the packager.
//!
//! A descriptor is built incrementally by the acquisition coordinator
//! as artifacts arrive, and consumed exactly once by the container
//! packager. Payload order inside the archive is significant and fixed:
//! certificate, ticket, content blobs grouped by kind, manifest blob,
//! manifest XML, control blobs, icon images.

use std::path::PathBuf;

use crate::manifest::ContentKind;
use crate::title::TitleId;

/// Role of a file inside the packaged archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageRole {
    Certificate,
    Ticket,
    Content(ContentKind),
    /// The downloaded manifest blob.
    Manifest,
    /// The manifest's XML text projection.
    ManifestXml,
    /// Icon images extracted from decrypted control data.
    Icon,
}

impl PackageRole {
    /// Rank in the fixed archive ordering. Lower packs first.
    fn rank(self) -> u8 {
        match self {
            PackageRole::Certificate => 0,
            PackageRole::Ticket => 1,
            PackageRole::Content(ContentKind::Program) => 2,
            PackageRole::Content(ContentKind::Data) => 3,
            PackageRole::Content(ContentKind::HtmlDocument) => 4,
            PackageRole::Content(ContentKind::LegalInformation) => 5,
            PackageRole::Content(ContentKind::DeltaFragment) => 6,
            PackageRole::Content(ContentKind::Meta) | PackageRole::Manifest => 7,
            PackageRole::ManifestXml => 8,
            PackageRole::Content(ContentKind::Control) => 9,
            PackageRole::Icon => 10,
        }
    }
}

/// One file scheduled for packaging.
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub role: PackageRole,
    pub path: PathBuf,
    pub size: u64,
}

/// Ordered set of files plus metadata for one acquired title version.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    pub title_id: TitleId,
    pub version: u32,
    /// Display name, when control data yielded one.
    pub title_name: Option<String>,
    files: Vec<PackageFile>,
}

impl PackageDescriptor {
    pub fn new(title_id: TitleId, version: u32) -> Self {
        Self {
            title_id,
            version,
            title_name: None,
            files: Vec::new(),
        }
    }

    /// Record a file for packaging.
    pub fn push(&mut self, role: PackageRole, path: PathBuf, size: u64) {
        self.files.push(PackageFile { role, path, size });
    }

    /// Files in archive order.
    ///
    /// Sorting is stable, so files sharing a role keep their insertion
    /// order.
    pub fn ordered_files(&self) -> Vec<&PackageFile> {
        let mut files: Vec<&PackageFile> = self.files.iter().collect();
        files.sort_by_key(|f| f.role.rank());
        files
    }

    /// Sum of all payload sizes.
    pub fn total_payload(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
