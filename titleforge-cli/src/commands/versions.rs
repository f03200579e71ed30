//! `versions` command: query the published latest-versions table.

use clap::Args;
use console::style;
use titleforge::cdn::CdnClient;
use titleforge::title::versions;

use crate::error::CliError;

use super::{load_config, parse_title_id, require_cdn};

#[derive(Debug, Args)]
pub struct VersionsArgs {
    /// Title id to look up (16 hex digits)
    pub title_id: String,

    /// List every released version instead of only the latest
    #[arg(short, long)]
    pub all: bool,
}

pub async fn run(args: VersionsArgs) -> Result<(), CliError> {
    let config = load_config();
    require_cdn(&config)?;
    if config.cdn.versions_url.is_empty() {
        return Err(CliError::Config(
            "no versions URL set. Add versions_url to the [cdn] section of config.ini".to_string(),
        ));
    }

    let id = parse_title_id(&args.title_id)?;
    let client = CdnClient::new(config.cdn_config())?;
    let table = client.latest_versions().await?;

    let Some(latest) = table.lookup(id) else {
        println!("{}: not in the published version table", id);
        return Ok(());
    };

    println!(
        "{}: latest v{} (requires v{})",
        style(id.to_string()).cyan(),
        latest.version,
        latest.required_version
    );
    if args.all {
        for version in versions(latest.version) {
            println!("  v{}", version);
        }
    }
    Ok(())
}
