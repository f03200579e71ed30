//! Single-file archive packaging.
//!
//! This module turns the set of files produced by one acquisition into
//! a single distributable container: a fixed header, a file table, a
//! string table, and the concatenated payloads. See [`writer`] for the
//! byte layout, [`reader`] for header read-back, [`descriptor`] for
//! the ordered input set, and [`naming`] for on-disk artifact names.

mod descriptor;
pub mod naming;
mod reader;
mod writer;

pub use descriptor::{PackageDescriptor, PackageFile, PackageRole};
pub use reader::{read_header, ArchiveEntry};
pub use writer::{pack, PackOutcome, MAGIC};

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while packing or reading archives.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A source path has no usable filename component.
    #[error("invalid source path: {0}")]
    InvalidSource(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The produced archive's length does not match the computed total.
    #[error("archive length mismatch: expected {expected} bytes, wrote {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// The file does not start with the archive magic.
    #[error("bad archive magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// Structurally invalid header.
    #[error("malformed archive: {0}")]
    Malformed(&'static str),

    /// Packing was cancelled at a chunk boundary.
    #[error("packing cancelled")]
    Cancelled,
}
