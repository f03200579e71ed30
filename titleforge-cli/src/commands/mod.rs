//! CLI command implementations.

pub mod fetch;
pub mod inspect;
pub mod pack;
pub mod versions;

use titleforge::config::ConfigFile;
use titleforge::title::{parse_key_file, KeyFileEntry, Title, TitleId, TitleRole};

use crate::error::CliError;

/// Load config or fall back to defaults.
pub fn load_config() -> ConfigFile {
    ConfigFile::load().unwrap_or_default()
}

/// Parse a 16-hex title id argument.
pub fn parse_title_id(raw: &str) -> Result<TitleId, CliError> {
    TitleId::from_hex(raw).map_err(|e| CliError::Usage(e.to_string()))
}

/// Build a [`Title`] for an id, dispatching on its role.
pub fn title_for(id: TitleId, version: u32, key: Option<String>, name: Option<String>) -> Title {
    let mut title = match id.role() {
        TitleRole::Base => Title::game(id),
        TitleRole::Update => Title::update(id.base_id(), version),
        TitleRole::AddOn => Title::add_on(id),
    };
    if let Some(key) = key {
        title = title.with_key(key);
    }
    if let Some(name) = name {
        title = title.with_name(name);
    }
    title
}

/// Look up a title in the configured key file, if one is set.
pub fn key_file_lookup(
    config: &ConfigFile,
    id: TitleId,
) -> Result<Option<KeyFileEntry>, CliError> {
    let Some(path) = &config.paths.key_file else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("cannot read key file {}: {e}", path.display())))?;
    let entries = parse_key_file(&contents)
        .map_err(|e| CliError::Config(format!("malformed key file {}: {e}", path.display())))?;
    Ok(entries.into_iter().find(|entry| entry.id == id))
}

/// The CDN section must carry a base URL before any network command.
pub fn require_cdn(config: &ConfigFile) -> Result<(), CliError> {
    if config.cdn.base_url.is_empty() {
        return Err(CliError::Config(
            "no CDN base URL set. Add base_url to the [cdn] section of config.ini".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_for_dispatches_on_role() {
        let base = parse_title_id("0100000000010000").unwrap();
        assert!(matches!(
            title_for(base, 0, None, None).variant,
            titleforge::title::TitleVariant::Game
        ));

        let update = parse_title_id("0100000000010800").unwrap();
        let title = title_for(update, 65536, None, None);
        assert!(title.is_update());
        assert_eq!(title.id, update);
    }

    #[test]
    fn test_parse_title_id_rejects_garbage() {
        assert!(parse_title_id("nope").is_err());
        assert!(parse_title_id("0100").is_err());
    }

    #[test]
    fn test_key_file_lookup_without_key_file() {
        let config = ConfigFile::default();
        let id = parse_title_id("0100000000010000").unwrap();
        assert!(key_file_lookup(&config, id).unwrap().is_none());
    }

    #[test]
    fn test_key_file_lookup_finds_entry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("titles.txt");
        std::fs::write(
            &path,
            "0100000000010000|000102030405060708090a0b0c0d0e0f|Example Game\n",
        )
        .unwrap();

        let mut config = ConfigFile::default();
        config.paths.key_file = Some(path);

        let id = parse_title_id("0100000000010000").unwrap();
        let entry = key_file_lookup(&config, id).unwrap().unwrap();
        assert_eq!(entry.name.as_deref(), Some("Example Game"));

        let other = parse_title_id("0100000000020000").unwrap();
        assert!(key_file_lookup(&config, other).unwrap().is_none());
    }
}
