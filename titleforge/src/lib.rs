//! Titleforge - console title acquisition and packaging.
//!
//! This library resolves a title+version against a content-delivery
//! network, downloads and verifies its content blobs with resumable
//! transfers, synthesizes the license artifacts that unlock it, and
//! packages everything into a single-file archive.
//!
//! The major pieces, in dependency order:
//!
//! - [`title`] — title identity, roles, and content keys
//! - [`progress`] — byte-counted, cancellable progress jobs
//! - [`manifest`] — the binary content-manifest format
//! - [`license`] — ticket/certificate synthesis
//! - [`cdn`] — the HTTP client with resume and integrity checking
//! - [`acquire`] — the coordinator tying the above together
//! - [`package`] — the single-file archive reader and writer
//! - [`config`] / [`telemetry`] — settings and logging

pub mod acquire;
pub mod cdn;
pub mod config;
pub mod license;
pub mod manifest;
pub mod package;
pub mod progress;
pub mod telemetry;
pub mod title;
