//! Configuration file handling.
//!
//! Settings live in an INI file under the platform config directory
//! (`~/.config/titleforge/config.ini` on Linux). Three sections:
//!
//! ```ini
//! [cdn]
//! base_url = https://atum.hac.lp1.d4c.nintendo.net
//! versions_url = https://tagaya.hac.lp1.eshop.nintendo.net/tagaya/hac_versionlist
//! device_id = ...
//! client_cert = /path/to/client.pem
//! firmware = 5.1.0-3.0
//! environment = lp1
//!
//! [paths]
//! working_dir = ...
//! templates_dir = ...
//! decrypt_helper = ...
//! output_dir = ...
//! key_file = ...
//!
//! [download]
//! parallelism = 4
//! timeout_secs = 30
//! buffer_size = 65536
//! ```
//!
//! Missing keys fall back to defaults; unknown keys are ignored so a
//! newer config file still loads on an older build.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::cdn::{CdnConfig, DEFAULT_ENVIRONMENT, DEFAULT_FIRMWARE};

/// Directory name under the platform config root.
const CONFIG_DIR_NAME: &str = "titleforge";

/// Config filename.
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no platform configuration directory available")]
    NoConfigDir,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: ini::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Path of the configuration file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// `[cdn]` section.
#[derive(Debug, Clone)]
pub struct CdnSection {
    pub base_url: String,
    pub versions_url: String,
    pub device_id: String,
    pub client_cert: Option<PathBuf>,
    pub firmware: String,
    pub environment: String,
}

impl Default for CdnSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            versions_url: String::new(),
            device_id: String::new(),
            client_cert: None,
            firmware: DEFAULT_FIRMWARE.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Default)]
pub struct PathsSection {
    pub working_dir: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
    pub decrypt_helper: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

/// `[download]` section.
#[derive(Debug, Clone)]
pub struct DownloadSection {
    pub parallelism: Option<usize>,
    pub timeout_secs: u64,
    pub buffer_size: Option<usize>,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            parallelism: None,
            timeout_secs: 30,
            buffer_size: None,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub cdn: CdnSection,
    pub paths: PathsSection,
    pub download: DownloadSection,
}

impl ConfigFile {
    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config = Self::default();
        if let Some(section) = ini.section(Some("cdn")) {
            if let Some(v) = section.get("base_url") {
                config.cdn.base_url = v.to_string();
            }
            if let Some(v) = section.get("versions_url") {
                config.cdn.versions_url = v.to_string();
            }
            if let Some(v) = section.get("device_id") {
                config.cdn.device_id = v.to_string();
            }
            if let Some(v) = section.get("client_cert") {
                config.cdn.client_cert = Some(PathBuf::from(v));
            }
            if let Some(v) = section.get("firmware") {
                config.cdn.firmware = v.to_string();
            }
            if let Some(v) = section.get("environment") {
                config.cdn.environment = v.to_string();
            }
        }
        if let Some(section) = ini.section(Some("paths")) {
            config.paths.working_dir = section.get("working_dir").map(PathBuf::from);
            config.paths.templates_dir = section.get("templates_dir").map(PathBuf::from);
            config.paths.decrypt_helper = section.get("decrypt_helper").map(PathBuf::from);
            config.paths.output_dir = section.get("output_dir").map(PathBuf::from);
            config.paths.key_file = section.get("key_file").map(PathBuf::from);
        }
        if let Some(section) = ini.section(Some("download")) {
            config.download.parallelism =
                section.get("parallelism").and_then(|v| v.parse().ok());
            if let Some(v) = section.get("timeout_secs").and_then(|v| v.parse().ok()) {
                config.download.timeout_secs = v;
            }
            config.download.buffer_size =
                section.get("buffer_size").and_then(|v| v.parse().ok());
        }
        Ok(config)
    }

    /// Save to the default location, creating the directory if needed.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_file_path()?;
        self.save_to(&path)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut ini = Ini::new();
        let cdn = Some("cdn".to_string());
        ini.set_to(cdn.clone(), "base_url".into(), self.cdn.base_url.clone());
        ini.set_to(
            cdn.clone(),
            "versions_url".into(),
            self.cdn.versions_url.clone(),
        );
        ini.set_to(cdn.clone(), "device_id".into(), self.cdn.device_id.clone());
        ini.set_to(cdn.clone(), "firmware".into(), self.cdn.firmware.clone());
        ini.set_to(
            cdn.clone(),
            "environment".into(),
            self.cdn.environment.clone(),
        );
        if let Some(cert) = &self.cdn.client_cert {
            ini.set_to(cdn, "client_cert".into(), cert.display().to_string());
        }

        let paths = Some("paths".to_string());
        for (key, value) in [
            ("working_dir", &self.paths.working_dir),
            ("templates_dir", &self.paths.templates_dir),
            ("decrypt_helper", &self.paths.decrypt_helper),
            ("output_dir", &self.paths.output_dir),
            ("key_file", &self.paths.key_file),
        ] {
            if let Some(value) = value {
                ini.set_to(paths.clone(), key.into(), value.display().to_string());
            }
        }

        let download = Some("download".to_string());
        ini.set_to(
            download.clone(),
            "timeout_secs".into(),
            self.download.timeout_secs.to_string(),
        );
        if let Some(parallelism) = self.download.parallelism {
            ini.set_to(
                download.clone(),
                "parallelism".into(),
                parallelism.to_string(),
            );
        }
        if let Some(buffer_size) = self.download.buffer_size {
            ini.set_to(download, "buffer_size".into(), buffer_size.to_string());
        }

        ini.write_to_file(path).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Project the `[cdn]` and `[download]` sections onto a
    /// [`CdnConfig`].
    pub fn cdn_config(&self) -> CdnConfig {
        let mut config = CdnConfig::new(self.cdn.base_url.clone(), self.cdn.versions_url.clone())
            .with_device_id(self.cdn.device_id.clone())
            .with_firmware(self.cdn.firmware.clone())
            .with_environment(self.cdn.environment.clone())
            .with_timeout(Duration::from_secs(self.download.timeout_secs));
        if let Some(cert) = &self.cdn.client_cert {
            config = config.with_client_cert(cert.clone());
        }
        if let Some(buffer_size) = self.download.buffer_size {
            config = config.with_buffer_size(buffer_size);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.cdn.base_url = "https://cdn.example".to_string();
        config.cdn.device_id = "cafe000000000001".to_string();
        config.cdn.client_cert = Some(PathBuf::from("/keys/client.pem"));
        config.paths.working_dir = Some(PathBuf::from("/work"));
        config.paths.key_file = Some(PathBuf::from("/keys/titles.txt"));
        config.download.parallelism = Some(8);
        config.download.timeout_secs = 60;
        config.download.buffer_size = Some(131072);
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.cdn.base_url, "https://cdn.example");
        assert_eq!(loaded.cdn.device_id, "cafe000000000001");
        assert_eq!(loaded.cdn.client_cert, Some(PathBuf::from("/keys/client.pem")));
        assert_eq!(loaded.paths.working_dir, Some(PathBuf::from("/work")));
        assert_eq!(loaded.paths.key_file, Some(PathBuf::from("/keys/titles.txt")));
        assert_eq!(loaded.download.parallelism, Some(8));
        assert_eq!(loaded.download.timeout_secs, 60);
        assert_eq!(loaded.download.buffer_size, Some(131072));
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[cdn]\nbase_url = https://cdn.example\n").unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.cdn.base_url, "https://cdn.example");
        assert_eq!(loaded.cdn.firmware, DEFAULT_FIRMWARE);
        assert_eq!(loaded.cdn.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(loaded.download.timeout_secs, 30);
        assert!(loaded.paths.working_dir.is_none());
    }

    #[test]
    fn test_cdn_config_projection() {
        let mut config = ConfigFile::default();
        config.cdn.base_url = "https://cdn.example".to_string();
        config.cdn.device_id = "did".to_string();
        config.download.timeout_secs = 45;

        let cdn = config.cdn_config();
        assert_eq!(cdn.base_url, "https://cdn.example");
        assert_eq!(cdn.device_id, "did");
        assert_eq!(cdn.timeout, Duration::from_secs(45));
    }
}
