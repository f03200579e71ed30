//! XML projection of a parsed manifest.
//!
//! The packaged archive carries a human-readable rendering of the
//! manifest alongside the binary blob. This is a pure projection of
//! the parsed fields; nothing reads it back.

use std::fmt::{self, Write};

use super::Manifest;

/// Render a manifest as its XML text projection.
pub fn render_xml(manifest: &Manifest) -> String {
    let mut out = String::new();
    // Writing into a String is infallible.
    let _ = write_xml(&mut out, manifest);
    out
}

fn write_xml(out: &mut String, manifest: &Manifest) -> fmt::Result {
    writeln!(out, r#"<?xml version="1.0" encoding="utf-8"?>"#)?;
    writeln!(out, "<ContentMeta>")?;
    writeln!(out, "  <Type>{}</Type>", manifest.kind.as_str())?;
    writeln!(out, "  <Id>0x{}</Id>", manifest.id)?;
    writeln!(out, "  <Version>{}</Version>", manifest.version)?;
    writeln!(
        out,
        "  <RequiredDownloadSystemVersion>{}</RequiredDownloadSystemVersion>",
        manifest.required_download_system_version
    )?;
    for entry in manifest.entries() {
        writeln!(out, "  <Content>")?;
        writeln!(out, "    <Type>{}</Type>", entry.kind.as_str())?;
        writeln!(out, "    <Id>{}</Id>", entry.id)?;
        writeln!(out, "    <Size>{}</Size>", entry.size)?;
        writeln!(out, "    <Hash>{}</Hash>", hex::encode(entry.hash))?;
        writeln!(
            out,
            "    <KeyGeneration>{}</KeyGeneration>",
            entry.key_generation
        )?;
        writeln!(out, "  </Content>")?;
    }
    writeln!(out, "  <Digest>{}</Digest>", hex::encode(manifest.digest))?;
    writeln!(
        out,
        "  <KeyGenerationMin>{}</KeyGenerationMin>",
        manifest.master_key_revision
    )?;
    writeln!(
        out,
        "  <RequiredSystemVersion>{}</RequiredSystemVersion>",
        manifest.required_system_version
    )?;
    writeln!(out, "</ContentMeta>")
}
