//! `pack` command: build an archive from files on disk.
//!
//! Roles are inferred from filenames, so artifacts produced by `fetch
//! --no-pack` pack into the same archive layout the fetch itself would
//! have produced.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use titleforge::manifest::ContentKind;
use titleforge::package::{self, PackOutcome, PackageDescriptor, PackageRole};
use titleforge::progress::ProgressJob;

use crate::error::CliError;
use crate::progress::attach_bar;

use super::parse_title_id;

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Files to pack, in any order (the archive uses the fixed layout)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output archive path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Title id recorded in the descriptor (16 hex digits)
    #[arg(long, default_value = "0000000000000000")]
    pub title_id: String,

    /// Version recorded in the descriptor
    #[arg(long, default_value_t = 0)]
    pub version: u32,
}

/// Infer an archive role from a filename.
fn role_for(path: &Path) -> PackageRole {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(".cert") {
        PackageRole::Certificate
    } else if name.ends_with(".tik") {
        PackageRole::Ticket
    } else if name.ends_with(".manifest.bin") {
        PackageRole::Manifest
    } else if name.ends_with(".manifest.xml") {
        PackageRole::ManifestXml
    } else if name.ends_with(".jpg") {
        PackageRole::Icon
    } else {
        PackageRole::Content(ContentKind::Program)
    }
}

pub async fn run(args: PackArgs) -> Result<(), CliError> {
    let id = parse_title_id(&args.title_id)?;
    let mut descriptor = PackageDescriptor::new(id, args.version);

    for path in &args.files {
        let size = std::fs::metadata(path)
            .map_err(|e| CliError::Usage(format!("cannot read {}: {e}", path.display())))?
            .len();
        descriptor.push(role_for(path), path.clone(), size);
    }

    let job = ProgressJob::new(descriptor.total_payload());
    let bar = attach_bar(&job, "packing".to_string());
    let outcome = package::pack(&descriptor, &args.output, Some(&job)).await?;
    bar.finish_and_clear();

    match outcome {
        PackOutcome::Written(bytes) => {
            println!(
                "Packed {} files into {} ({} bytes)",
                descriptor.len(),
                style(args.output.display().to_string()).green(),
                bytes
            );
        }
        PackOutcome::AlreadyComplete(bytes) => {
            println!(
                "Archive already complete: {} ({} bytes)",
                args.output.display(),
                bytes
            );
        }
    }
    Ok(())
}
