//! Title identity and variant model.
//!
//! A *title* is an acquirable unit of content: a full game, an update,
//! add-on content, or a demo. Titles are identified by a 64-bit id whose
//! low 12 bits encode the role:
//!
//! - `0x000` — base game (or demo)
//! - `0x800` — update
//! - anything else — add-on content
//!
//! Updates and add-ons derive their parent's id arithmetically, so a
//! single id is enough to navigate the family:
//!
//! ```
//! use titleforge::title::TitleId;
//!
//! let update = TitleId::from_hex("0100000000010800").unwrap();
//! assert_eq!(update.base_id().to_string(), "0100000000010000");
//! ```
//!
//! Variant-specific data (parent id, update version) lives on the
//! [`TitleVariant`] tag rather than on subclasses; callers dispatch by
//! matching the tag.

mod keyfile;

pub use keyfile::{parse_key_file, KeyFileEntry};

use std::fmt;

use thiserror::Error;

/// Version step between consecutive released versions of a title.
pub const VERSION_STEP: u32 = 0x10000;

/// Errors produced while constructing title identities or keys.
#[derive(Debug, Error)]
pub enum TitleError {
    /// The id string is not exactly 16 hex digits.
    #[error("invalid title id {0:?}: expected 16 hex digits")]
    InvalidId(String),

    /// The content key string is not exactly 32 hex digits.
    #[error("invalid content key: expected 32 hex digits")]
    InvalidKey,
}

/// 64-bit title identifier, rendered as lowercase 16-hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TitleId(u64);

impl TitleId {
    /// Parse a 16-hex-digit id string.
    ///
    /// # Errors
    ///
    /// Returns [`TitleError::InvalidId`] if the string is not exactly
    /// 16 hexadecimal digits.
    pub fn from_hex(s: &str) -> Result<Self, TitleError> {
        // from_str_radix tolerates a leading `+`; hex digits only.
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TitleError::InvalidId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(TitleId)
            .map_err(|_| TitleError::InvalidId(s.to_string()))
    }

    /// Wrap a raw 64-bit id.
    pub fn from_u64(raw: u64) -> Self {
        TitleId(raw)
    }

    /// The raw 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Role encoded in the low 12 bits of the id.
    pub fn role(self) -> TitleRole {
        match self.0 & 0xFFF {
            0x000 => TitleRole::Base,
            0x800 => TitleRole::Update,
            _ => TitleRole::AddOn,
        }
    }

    /// Derive the base-game id for this title.
    ///
    /// Base ids map to themselves, update ids clear the low 12 bits,
    /// and add-on ids step down one family slot before clearing them.
    pub fn base_id(self) -> TitleId {
        match self.role() {
            TitleRole::Base => self,
            TitleRole::Update => TitleId(self.0 & !0xFFF),
            TitleRole::AddOn => TitleId(((self.0 >> 12) - 1) << 12),
        }
    }

    /// Derive the update id belonging to this title's family.
    pub fn update_id(self) -> TitleId {
        TitleId(self.base_id().0 | 0x800)
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Role of a title id within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleRole {
    Base,
    Update,
    AddOn,
}

/// Variant tag carrying the fields that differ between title kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleVariant {
    /// A full base game.
    Game,
    /// A demo; shares the base role but is never packaged with a key.
    Demo,
    /// An update to `parent`, at a specific update `version`.
    Update { parent: TitleId, version: u32 },
    /// Add-on content belonging to `parent`.
    AddOn { parent: TitleId },
}

/// An acquirable unit of content.
///
/// Created when first referenced (key file, scan, or update/add-on
/// discovery) and mutated as manifests and metadata arrive. The
/// `required_system_version` and `master_key_revision` fields start
/// unknown and are populated from the first manifest fetched for the
/// title.
#[derive(Debug, Clone)]
pub struct Title {
    pub id: TitleId,
    pub variant: TitleVariant,
    /// 32-hex-digit content key, if known.
    pub key: Option<String>,
    /// Display name, populated from control data or a key file.
    pub name: Option<String>,
    /// Latest released version, from the CDN version table.
    pub latest_version: Option<u32>,
    pub required_system_version: Option<u64>,
    pub master_key_revision: Option<u8>,
}

impl Title {
    /// Create a title with no metadata beyond its id and variant.
    pub fn new(id: TitleId, variant: TitleVariant) -> Self {
        Self {
            id,
            variant,
            key: None,
            name: None,
            latest_version: None,
            required_system_version: None,
            master_key_revision: None,
        }
    }

    /// Create a base-game title.
    pub fn game(id: TitleId) -> Self {
        Self::new(id, TitleVariant::Game)
    }

    /// Create an update title for the given base id.
    pub fn update(parent: TitleId, version: u32) -> Self {
        Self::new(parent.update_id(), TitleVariant::Update { parent, version })
    }

    /// Create an add-on title.
    pub fn add_on(id: TitleId) -> Self {
        let parent = id.base_id();
        Self::new(id, TitleVariant::AddOn { parent })
    }

    /// Set the content key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this title carries a usable content key.
    ///
    /// A key is valid iff it is present, exactly 32 hex digits, and
    /// not all zero.
    pub fn has_valid_key(&self) -> bool {
        self.decoded_key().is_some()
    }

    /// Decode the content key to its 16 raw bytes, if valid.
    pub fn decoded_key(&self) -> Option<[u8; 16]> {
        let key = self.key.as_deref()?;
        if key.len() != 32 {
            return None;
        }
        let bytes = hex::decode(key).ok()?;
        if bytes.iter().all(|&b| b == 0) {
            return None;
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes);
        Some(out)
    }

    /// Whether this title is an update.
    pub fn is_update(&self) -> bool {
        matches!(self.variant, TitleVariant::Update { .. })
    }
}

/// Enumerate the released versions of a title, newest first.
///
/// Versions are multiples of [`VERSION_STEP`] descending from
/// `latest` and always terminate at 0.
pub fn versions(latest: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity((latest / VERSION_STEP) as usize + 1);
    let mut v = latest - (latest % VERSION_STEP);
    loop {
        out.push(v);
        if v == 0 {
            break;
        }
        v -= VERSION_STEP;
    }
    out
}
