//! CLI error types.

use std::fmt;

use titleforge::acquire::AcquireError;
use titleforge::cdn::FetchError;
use titleforge::config::ConfigError;
use titleforge::package::PackageError;

/// Errors surfaced to the terminal.
#[derive(Debug)]
pub enum CliError {
    /// Configuration is missing or invalid.
    Config(String),

    /// An acquisition failed.
    Acquire(AcquireError),

    /// A standalone CDN operation failed.
    Fetch(FetchError),

    /// Packing or inspecting an archive failed.
    Package(PackageError),

    /// Bad command-line input.
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Acquire(e) => write!(f, "{}", e),
            CliError::Fetch(e) => write!(f, "{}", e),
            CliError::Package(e) => write!(f, "{}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Acquire(e) => Some(e),
            CliError::Fetch(e) => Some(e),
            CliError::Package(e) => Some(e),
            CliError::Config(_) | CliError::Usage(_) => None,
        }
    }
}

impl From<AcquireError> for CliError {
    fn from(e: AcquireError) -> Self {
        CliError::Acquire(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Fetch(e)
    }
}

impl From<PackageError> for CliError {
    fn from(e: PackageError) -> Self {
        CliError::Package(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = CliError::Config("no base_url set".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("no base_url"));
    }
}
