//! `fetch` command: acquire a title version and pack it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use titleforge::acquire::{CommandDecryptor, Coordinator};
use titleforge::cdn::CdnClient;
use titleforge::package::{self, naming, PackOutcome};
use titleforge::progress::ProgressJob;
use tracing::info;

use crate::error::CliError;
use crate::progress::attach_bar;

use super::{key_file_lookup, load_config, parse_title_id, require_cdn, title_for};

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Title id (16 hex digits)
    pub title_id: String,

    /// Version to fetch (defaults to the latest published version)
    #[arg(short, long)]
    pub version: Option<u32>,

    /// Content key (32 hex digits), overriding any key file
    #[arg(short, long)]
    pub key: Option<String>,

    /// Display name override for the archive filename
    #[arg(short, long)]
    pub name: Option<String>,

    /// Working directory for downloaded artifacts
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,

    /// Output directory for the packed archive
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Include the manifest blob and its XML rendering in the archive
    #[arg(long)]
    pub repack_manifest: bool,

    /// Acquire only; skip packing the archive
    #[arg(long)]
    pub no_pack: bool,
}

pub async fn run(args: FetchArgs) -> Result<(), CliError> {
    let config = load_config();
    require_cdn(&config)?;

    let id = parse_title_id(&args.title_id)?;
    let client = CdnClient::new(config.cdn_config())?;

    let version = match args.version {
        Some(version) => version,
        None => {
            let table = client.latest_versions().await?;
            table.lookup(id).map(|latest| latest.version).unwrap_or(0)
        }
    };
    // Command-line key and name win over the key file.
    let mut key = args.key.clone();
    let mut name = args.name.clone();
    if key.is_none() || name.is_none() {
        if let Some(entry) = key_file_lookup(&config, id)? {
            key = key.or(entry.key);
            name = name.or(entry.name);
        }
    }
    let title = title_for(id, version, key, name);

    let helper = config.paths.decrypt_helper.clone().ok_or_else(|| {
        CliError::Config(
            "no decrypt helper set. Add decrypt_helper to the [paths] section of config.ini"
                .to_string(),
        )
    })?;
    let mut coordinator = Coordinator::new(client, Arc::new(CommandDecryptor::new(helper)));
    if let Some(templates) = config.paths.templates_dir.clone() {
        coordinator = coordinator.with_templates_dir(templates);
    }
    if let Some(parallelism) = config.download.parallelism {
        coordinator = coordinator.with_parallelism(parallelism);
    }

    let working_dir = args
        .working_dir
        .or_else(|| config.paths.working_dir.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("titleforge"));

    let job = Arc::new(ProgressJob::new(0));
    let bar = attach_bar(&job, format!("{id} v{version}"));

    // Ctrl-C flips the cancellation flag; transfers stop at the next
    // chunk boundary.
    let signal_job = job.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_job.cancel();
        }
    });

    info!(title_id = %id, version, "fetching");
    let acquired = coordinator
        .acquire(
            &title,
            version,
            &working_dir,
            args.repack_manifest,
            Some(job.as_ref()),
        )
        .await;
    bar.finish_and_clear();
    let descriptor = match acquired {
        Ok(descriptor) => descriptor,
        Err(err) => {
            let display = title.name.clone().unwrap_or_else(|| id.to_string());
            eprintln!("{} {}", style("Failed:").red().bold(), display);
            return Err(err.into());
        }
    };

    println!(
        "Acquired {} v{}: {} files, {} bytes",
        style(id.to_string()).cyan(),
        version,
        descriptor.len(),
        descriptor.total_payload()
    );

    if args.no_pack {
        println!("Artifacts left in {}", working_dir.display());
        return Ok(());
    }

    let output_dir = args
        .output_dir
        .or_else(|| config.paths.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| CliError::Config(format!("cannot create output directory: {e}")))?;
    let output = output_dir.join(naming::archive_filename(
        descriptor.title_name.as_deref(),
        id,
        version,
    ));

    let pack_job = ProgressJob::new(descriptor.total_payload());
    let pack_bar = attach_bar(&pack_job, "packing".to_string());
    let outcome = package::pack(&descriptor, &output, Some(&pack_job)).await?;
    pack_bar.finish_and_clear();

    match outcome {
        PackOutcome::Written(bytes) => {
            println!(
                "Packed {} ({} bytes)",
                style(output.display().to_string()).green(),
                bytes
            );
        }
        PackOutcome::AlreadyComplete(bytes) => {
            println!(
                "Archive already complete: {} ({} bytes)",
                output.display(),
                bytes
            );
        }
    }
    Ok(())
}
