//! License artifact synthesis.
//!
//! Each packaged title carries two small binary license artifacts: a
//! *ticket* and a *certificate*, named after the title's rights id.
//! For base games and add-on content they are synthesized by patching
//! fixed templates at known byte offsets; for updates they are sliced
//! out of a license blob fetched from the CDN.
//!
//! The ticket offsets are expressed as a typed field set
//! ([`TicketFields`]) rather than raw indexing, but the offsets
//! themselves are invariants of the wire format and must not drift.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::package::naming::{certificate_filename, ticket_filename};
use crate::title::TitleId;

/// Offset of the 16-byte content key inside a ticket.
pub const TICKET_CONTENT_KEY_OFFSET: usize = 0x180;

/// Offset of the master-key-revision byte inside a ticket.
///
/// Empirically derived constant: documentation for the format
/// disagrees between 0x285 and 0x286, and 0x286 is the value working
/// implementations actually write. Treat with suspicion if tickets
/// stop validating.
pub const TICKET_MASTER_KEY_REV_OFFSET: usize = 0x286;

/// Offset of the 16-byte rights id inside a ticket.
pub const TICKET_RIGHTS_ID_OFFSET: usize = 0x2A0;

/// Minimum usable ticket template length.
pub const TICKET_MIN_LEN: usize = TICKET_RIGHTS_ID_OFFSET + 16;

/// Byte range of the ticket inside a fetched license blob.
pub const LICENSE_TICKET_RANGE: Range<usize> = 0x0..0x2C0;

/// Byte range of the certificate inside a fetched license blob.
pub const LICENSE_CERT_RANGE: Range<usize> = 0x2C0..0x2C0 + 0x700;

/// Template filenames looked up in the templates directory.
pub const TICKET_TEMPLATE_NAME: &str = "ticket.tmpl";
pub const CERT_TEMPLATE_NAME: &str = "certificate.tmpl";

/// Errors produced during license artifact synthesis.
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("ticket template too short: {len} bytes, need at least {need}")]
    TemplateTooShort { len: usize, need: usize },

    #[error("license blob too short: {len} bytes, need at least {need}")]
    LicenseBlobTooShort { len: usize, need: usize },

    #[error("rights id {0:?} is not 32 hex digits")]
    InvalidRightsId(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Derive the rights id naming a title's license artifacts.
///
/// The rights id is two 16-hex halves: the title id followed by the
/// master-key revision, each zero-padded to 64 bits.
pub fn rights_id(id: TitleId, master_key_revision: u8) -> String {
    format!("{:016x}{:016x}", id.as_u64(), master_key_revision)
}

/// The patchable fields of a ticket, at their fixed offsets.
#[derive(Debug, Clone, Copy)]
pub struct TicketFields {
    pub content_key: [u8; 16],
    pub master_key_revision: u8,
    pub rights_id: [u8; 16],
}

impl TicketFields {
    /// Build the field set for a title.
    ///
    /// # Errors
    ///
    /// Fails if `rights_id` is not 32 hex digits.
    pub fn new(
        content_key: [u8; 16],
        master_key_revision: u8,
        rights_id: &str,
    ) -> Result<Self, LicenseError> {
        let decoded = hex::decode(rights_id)
            .ok()
            .filter(|b| b.len() == 16)
            .ok_or_else(|| LicenseError::InvalidRightsId(rights_id.to_string()))?;
        let mut rights = [0u8; 16];
        rights.copy_from_slice(&decoded);
        Ok(Self {
            content_key,
            master_key_revision,
            rights_id: rights,
        })
    }

    /// Patch the fields into a copy of `template`.
    pub fn apply(&self, template: &[u8]) -> Result<Vec<u8>, LicenseError> {
        if template.len() < TICKET_MIN_LEN {
            return Err(LicenseError::TemplateTooShort {
                len: template.len(),
                need: TICKET_MIN_LEN,
            });
        }
        let mut ticket = template.to_vec();
        ticket[TICKET_CONTENT_KEY_OFFSET..TICKET_CONTENT_KEY_OFFSET + 16]
            .copy_from_slice(&self.content_key);
        ticket[TICKET_MASTER_KEY_REV_OFFSET] = self.master_key_revision;
        ticket[TICKET_RIGHTS_ID_OFFSET..TICKET_RIGHTS_ID_OFFSET + 16]
            .copy_from_slice(&self.rights_id);
        Ok(ticket)
    }
}

/// Ticket and certificate templates, loaded once from disk.
#[derive(Debug, Clone, Default)]
pub struct LicenseTemplates {
    pub ticket: Option<Vec<u8>>,
    pub certificate: Option<Vec<u8>>,
}

impl LicenseTemplates {
    /// Load templates from a directory; missing files are simply absent.
    ///
    /// # Errors
    ///
    /// Only genuine read faults (permissions, short reads) fail; a
    /// nonexistent template file is not an error.
    pub fn load(dir: &Path) -> Result<Self, LicenseError> {
        Ok(Self {
            ticket: read_optional(&dir.join(TICKET_TEMPLATE_NAME))?,
            certificate: read_optional(&dir.join(CERT_TEMPLATE_NAME))?,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, LicenseError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LicenseError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Paths of the artifacts produced (or reused) for one title.
///
/// `None` means the artifact step was skipped because no template and
/// no existing file were available; the title stays locked but the
/// download is allowed to proceed.
#[derive(Debug, Clone, Default)]
pub struct LicenseOutcome {
    pub ticket: Option<PathBuf>,
    pub certificate: Option<PathBuf>,
}

/// Synthesize license artifacts from templates for a base game or
/// add-on title.
///
/// Existing artifacts at the expected paths are reused untouched. A
/// missing template with no existing artifact skips that artifact
/// silently.
pub fn generate_from_templates(
    working_dir: &Path,
    rights_id: &str,
    templates: &LicenseTemplates,
    content_key: Option<[u8; 16]>,
    master_key_revision: u8,
) -> Result<LicenseOutcome, LicenseError> {
    let cert_path = working_dir.join(certificate_filename(rights_id));
    let certificate = if cert_path.exists() {
        Some(cert_path)
    } else if let Some(template) = &templates.certificate {
        write_artifact(&cert_path, template)?;
        Some(cert_path)
    } else {
        debug!(rights_id, "no certificate template, skipping certificate");
        None
    };

    let ticket_path = working_dir.join(ticket_filename(rights_id));
    let ticket = if ticket_path.exists() {
        Some(ticket_path)
    } else {
        match (&templates.ticket, content_key) {
            (Some(template), Some(key)) => {
                let fields = TicketFields::new(key, master_key_revision, rights_id)?;
                write_artifact(&ticket_path, &fields.apply(template)?)?;
                Some(ticket_path)
            }
            _ => {
                debug!(rights_id, "no ticket template or key, skipping ticket");
                None
            }
        }
    };

    Ok(LicenseOutcome {
        ticket,
        certificate,
    })
}

/// Slice license artifacts out of a fetched license blob (updates).
///
/// The blob carries the ticket at [`LICENSE_TICKET_RANGE`] and the
/// certificate at [`LICENSE_CERT_RANGE`]. Existing artifacts are
/// reused rather than overwritten.
pub fn slice_license_blob(
    working_dir: &Path,
    rights_id: &str,
    blob: &[u8],
) -> Result<LicenseOutcome, LicenseError> {
    if blob.len() < LICENSE_CERT_RANGE.end {
        return Err(LicenseError::LicenseBlobTooShort {
            len: blob.len(),
            need: LICENSE_CERT_RANGE.end,
        });
    }

    let ticket_path = working_dir.join(ticket_filename(rights_id));
    if !ticket_path.exists() {
        write_artifact(&ticket_path, &blob[LICENSE_TICKET_RANGE])?;
    }

    let cert_path = working_dir.join(certificate_filename(rights_id));
    if !cert_path.exists() {
        write_artifact(&cert_path, &blob[LICENSE_CERT_RANGE])?;
    }

    Ok(LicenseOutcome {
        ticket: Some(ticket_path),
        certificate: Some(cert_path),
    })
}

/// Recover a content key from an existing ticket.
///
/// Reads the 16 bytes at the content-key offset; an all-zero key or a
/// ticket too short to carry one yields `None`.
pub fn recover_content_key(ticket_path: &Path) -> Result<Option<[u8; 16]>, LicenseError> {
    let bytes = match fs::read(ticket_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LicenseError::Io {
                path: ticket_path.to_path_buf(),
                source: e,
            })
        }
    };
    if bytes.len() < TICKET_CONTENT_KEY_OFFSET + 16 {
        return Ok(None);
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(&bytes[TICKET_CONTENT_KEY_OFFSET..TICKET_CONTENT_KEY_OFFSET + 16]);
    if key.iter().all(|&b| b == 0) {
        Ok(None)
    } else {
        Ok(Some(key))
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), LicenseError> {
    fs::write(path, bytes).map_err(|e| LicenseError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn title_id() -> TitleId {
        TitleId::from_hex("0100000000010000").unwrap()
    }

    fn templates() -> LicenseTemplates {
        LicenseTemplates {
            ticket: Some(vec![0u8; 0x2C0]),
            certificate: Some(vec![0xCCu8; 0x700]),
        }
    }

    #[test]
    fn test_rights_id_format() {
        assert_eq!(
            rights_id(title_id(), 3),
            "01000000000100000000000000000003"
        );
        assert_eq!(
            rights_id(title_id(), 0),
            "01000000000100000000000000000000"
        );
    }

    #[test]
    fn test_ticket_fields_patch_offsets() {
        let key = [0x42u8; 16];
        let rights = rights_id(title_id(), 5);
        let fields = TicketFields::new(key, 5, &rights).unwrap();
        let ticket = fields.apply(&vec![0u8; 0x2C0]).unwrap();

        assert_eq!(&ticket[0x180..0x190], &key);
        assert_eq!(ticket[0x286], 5);
        assert_eq!(&ticket[0x2A0..0x2B0], &hex::decode(&rights).unwrap()[..]);
        assert_eq!(ticket.len(), 0x2C0);
    }

    #[test]
    fn test_ticket_fields_reject_short_template() {
        let fields =
            TicketFields::new([1u8; 16], 0, &rights_id(title_id(), 0)).unwrap();
        let err = fields.apply(&vec![0u8; 0x100]).unwrap_err();
        assert!(matches!(err, LicenseError::TemplateTooShort { .. }));
    }

    #[test]
    fn test_generate_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id(), 2);

        let outcome = generate_from_templates(
            dir.path(),
            &rights,
            &templates(),
            Some([0x11u8; 16]),
            2,
        )
        .unwrap();

        let ticket = std::fs::read(outcome.ticket.unwrap()).unwrap();
        assert_eq!(&ticket[0x180..0x190], &[0x11u8; 16]);
        assert_eq!(ticket[0x286], 2);

        let cert = std::fs::read(outcome.certificate.unwrap()).unwrap();
        assert_eq!(cert, vec![0xCCu8; 0x700]);
    }

    #[test]
    fn test_generate_reuses_existing_ticket() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id(), 0);
        let existing = dir.path().join(ticket_filename(&rights));
        std::fs::write(&existing, vec![0xEEu8; 0x2C0]).unwrap();

        let outcome =
            generate_from_templates(dir.path(), &rights, &templates(), Some([1u8; 16]), 0)
                .unwrap();

        // The pre-existing file is untouched.
        assert_eq!(outcome.ticket.as_deref(), Some(existing.as_path()));
        assert_eq!(std::fs::read(&existing).unwrap(), vec![0xEEu8; 0x2C0]);
    }

    #[test]
    fn test_generate_skips_without_template() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id(), 0);

        let outcome = generate_from_templates(
            dir.path(),
            &rights,
            &LicenseTemplates::default(),
            Some([1u8; 16]),
            0,
        )
        .unwrap();

        assert!(outcome.ticket.is_none());
        assert!(outcome.certificate.is_none());
    }

    #[test]
    fn test_generate_skips_ticket_without_key() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id(), 0);

        let outcome =
            generate_from_templates(dir.path(), &rights, &templates(), None, 0).unwrap();

        assert!(outcome.ticket.is_none());
        assert!(outcome.certificate.is_some());
    }

    #[test]
    fn test_slice_license_blob_ranges() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id().update_id(), 1);

        let mut blob = vec![0u8; 0x2C0 + 0x700];
        blob[..0x2C0].fill(0xAA);
        blob[0x2C0..].fill(0xBB);

        let outcome = slice_license_blob(dir.path(), &rights, &blob).unwrap();

        assert_eq!(
            std::fs::read(outcome.ticket.unwrap()).unwrap(),
            vec![0xAAu8; 0x2C0]
        );
        assert_eq!(
            std::fs::read(outcome.certificate.unwrap()).unwrap(),
            vec![0xBBu8; 0x700]
        );
    }

    #[test]
    fn test_slice_license_blob_too_short() {
        let dir = TempDir::new().unwrap();
        let err = slice_license_blob(dir.path(), &rights_id(title_id(), 0), &[0u8; 0x100])
            .unwrap_err();
        assert!(matches!(err, LicenseError::LicenseBlobTooShort { .. }));
    }

    #[test]
    fn test_recover_content_key() {
        let dir = TempDir::new().unwrap();
        let rights = rights_id(title_id(), 4);
        let outcome = generate_from_templates(
            dir.path(),
            &rights,
            &templates(),
            Some([0x77u8; 16]),
            4,
        )
        .unwrap();

        let key = recover_content_key(&outcome.ticket.unwrap()).unwrap();
        assert_eq!(key, Some([0x77u8; 16]));
    }

    #[test]
    fn test_recover_content_key_absent_or_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            recover_content_key(&dir.path().join("missing.tik")).unwrap(),
            None
        );

        let zero = dir.path().join("zero.tik");
        std::fs::write(&zero, vec![0u8; 0x2C0]).unwrap();
        assert_eq!(recover_content_key(&zero).unwrap(), None);
    }

    #[test]
    fn test_templates_load_missing_dir_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TICKET_TEMPLATE_NAME), vec![0u8; 0x2C0]).unwrap();

        let templates = LicenseTemplates::load(dir.path()).unwrap();
        assert!(templates.ticket.is_some());
        assert!(templates.certificate.is_none());
    }
}
