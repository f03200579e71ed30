//! Pipe-delimited title-key list parsing.
//!
//! Key files seed a library with known titles: one `id|key|name` record
//! per line. The key and name columns may be empty, and lines starting
//! with `#` are comments.

use super::{TitleError, TitleId};

/// One record from a title-key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFileEntry {
    pub id: TitleId,
    pub key: Option<String>,
    pub name: Option<String>,
}

/// Parse the contents of a title-key file.
///
/// Blank lines and `#` comments are skipped. Records with malformed
/// ids fail the whole parse; a missing key or name column is fine.
///
/// # Errors
///
/// Returns [`TitleError::InvalidId`] for the first malformed id.
pub fn parse_key_file(contents: &str) -> Result<Vec<KeyFileEntry>, TitleError> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split('|');
        let id = TitleId::from_hex(cols.next().unwrap_or("").trim())?;
        let key = cols
            .next()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        let name = cols
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        entries.push(KeyFileEntry { id, key, name });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_file() {
        let contents = "\
# id|key|name
0100000000010000|000102030405060708090a0b0c0d0e0f|Example Game

0100000000010800||Example Update
";
        let entries = parse_key_file(contents).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id.to_string(), "0100000000010000");
        assert_eq!(
            entries[0].key.as_deref(),
            Some("000102030405060708090a0b0c0d0e0f")
        );
        assert_eq!(entries[0].name.as_deref(), Some("Example Game"));

        assert_eq!(entries[1].id.to_string(), "0100000000010800");
        assert_eq!(entries[1].key, None);
        assert_eq!(entries[1].name.as_deref(), Some("Example Update"));
    }

    #[test]
    fn test_parse_key_file_uppercase_key_normalized() {
        let entries = parse_key_file("0100000000010000|ABCDEF00000000000000000000000001|X").unwrap();
        assert_eq!(
            entries[0].key.as_deref(),
            Some("abcdef00000000000000000000000001")
        );
    }

    #[test]
    fn test_parse_key_file_bad_id() {
        assert!(parse_key_file("nothex|key|name").is_err());
    }
}
