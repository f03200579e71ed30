//! Centralized on-disk artifact naming.
//!
//! This module is the single source of truth for all artifact
//! filenames produced during acquisition and packaging:
//!
//! - content blobs (`{contentId}.bin`)
//! - manifest blob and its XML projection
//! - license artifacts (`{rightsId}.tik` / `{rightsId}.cert`)
//! - the final archive (`{name} [{titleId}][v{version}].pkg`)
//!
//! All other modules should use these functions rather than
//! constructing names directly.

use crate::title::TitleId;

/// Filename of a downloaded content blob.
pub fn content_filename(content_id: &str) -> String {
    format!("{content_id}.bin")
}

/// Filename of the downloaded (still encrypted) manifest blob.
pub fn manifest_filename(content_id: &str) -> String {
    format!("{content_id}.manifest.bin")
}

/// Filename of the manifest's XML text projection.
pub fn manifest_xml_filename(content_id: &str) -> String {
    format!("{content_id}.manifest.xml")
}

/// Filename of a ticket for the given rights id.
pub fn ticket_filename(rights_id: &str) -> String {
    format!("{rights_id}.tik")
}

/// Filename of a certificate for the given rights id.
pub fn certificate_filename(rights_id: &str) -> String {
    format!("{rights_id}.cert")
}

/// Filename of the final packed archive.
///
/// Falls back to the title id when no display name is known.
pub fn archive_filename(name: Option<&str>, id: TitleId, version: u32) -> String {
    let name = name.unwrap_or("unknown").trim();
    format!("{name} [{id}][v{version}].pkg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_and_manifest_names() {
        let cid = "ab".repeat(16);
        assert_eq!(content_filename(&cid), format!("{cid}.bin"));
        assert_eq!(manifest_filename(&cid), format!("{cid}.manifest.bin"));
        assert_eq!(manifest_xml_filename(&cid), format!("{cid}.manifest.xml"));
    }

    #[test]
    fn test_license_names() {
        let rights = "01000000000100000000000000000003";
        assert_eq!(ticket_filename(rights), format!("{rights}.tik"));
        assert_eq!(certificate_filename(rights), format!("{rights}.cert"));
    }

    #[test]
    fn test_archive_filename() {
        let id = TitleId::from_hex("0100000000010000").unwrap();
        assert_eq!(
            archive_filename(Some("Example Game"), id, 0x20000),
            "Example Game [0100000000010000][v131072].pkg"
        );
        assert_eq!(
            archive_filename(None, id, 0),
            "unknown [0100000000010000][v0].pkg"
        );
    }
}
