//! `inspect` command: print the file table of a packed archive.

use std::path::PathBuf;

use clap::Args;
use console::style;
use titleforge::package::read_header;

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Archive to inspect
    pub archive: PathBuf,
}

pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let entries = read_header(&args.archive)?;

    println!(
        "{} ({} files)",
        style(args.archive.display().to_string()).cyan(),
        entries.len()
    );
    let name_width = entries.iter().map(|e| e.name.len()).max().unwrap_or(4);
    println!("{:<name_width$}  {:>14}  {:>14}", "name", "size", "offset");
    for entry in &entries {
        println!(
            "{:<name_width$}  {:>14}  {:>14}",
            entry.name, entry.size, entry.data_offset
        );
    }
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!("total payload: {} bytes", total);
    Ok(())
}
