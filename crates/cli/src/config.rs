//! Configuration loading from policyd.toml.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// Listener configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to accept connections on.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Policy adapter shared by enforcers that opt in.
#[derive(Debug, Default, Deserialize)]
pub struct AdapterConfig {
    /// "file", "sqlite", or empty for none.
    #[serde(default)]
    pub driver: String,

    /// Path for the file and sqlite drivers.
    #[serde(default)]
    pub connection: String,

    /// The database must already exist.
    #[serde(default)]
    pub db_specified: bool,
}

fn default_listen() -> String {
    "127.0.0.1:50051".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:50051");
        assert!(config.adapter.driver.is_empty());
        assert!(!config.adapter.db_specified);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [server]
            listen = "0.0.0.0:7000"

            [adapter]
            driver = "sqlite"
            connection = "policy.db"
            db_specified = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.adapter.driver, "sqlite");
        assert_eq!(config.adapter.connection, "policy.db");
        assert!(config.adapter.db_specified);
    }

    #[test]
    fn test_partial_section() {
        let config = Config::parse("[adapter]\ndriver = \"file\"\n").unwrap();
        assert_eq!(config.adapter.driver, "file");
        assert_eq!(config.server.listen, "127.0.0.1:50051");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse("[server\nlisten = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_or_default("/nonexistent/policyd.toml").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:50051");
    }
}
