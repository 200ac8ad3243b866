//! Configuration parsing and validation for tollgate.

use serde::Deserialize;
use std::path::Path;

use crate::cost::PricingTable;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub pricing: PricingTable,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3007")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3007".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible upstream (e.g., "https://api.example.com/v4").
    /// Required; startup fails when absent or empty.
    pub url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./tollgate.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        config.pricing.normalize();
        config.upstream.url = config.upstream.url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "upstream.url is required and must not be empty".to_string(),
            ));
        }

        if self.database.is_none() {
            tracing::warn!("No database configured - request logging is disabled");
        }

        Ok(())
    }

    /// Get database config with defaults.
    pub fn database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::parse_str(
            r#"
            [upstream]
            url = "https://api.example.com/v4"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:3007");
        assert_eq!(config.upstream.url, "https://api.example.com/v4");
        assert!(config.database.is_none());
        // Built-in pricing applies when no [pricing] section is given
        assert_eq!(config.pricing.lookup("glm-4.6").input, 0.6);
    }

    #[test]
    fn missing_upstream_url_is_an_error() {
        let result = Config::parse_str(
            r#"
            [server]
            listen = "127.0.0.1:0"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_upstream_url_is_an_error() {
        let result = Config::parse_str(
            r#"
            [upstream]
            url = ""
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn trailing_slashes_stripped_from_upstream_url() {
        let config = Config::parse_str(
            r#"
            [upstream]
            url = "https://api.example.com/v4///"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.url, "https://api.example.com/v4");
    }

    #[test]
    fn pricing_section_overrides_builtin_table() {
        let config = Config::parse_str(
            r#"
            [upstream]
            url = "https://api.example.com"

            [pricing.models."MY-Model"]
            input = 1.5
            cached = 0.5
            output = 3.0
            "#,
        )
        .unwrap();

        // Keys are lowercased at load time
        let rates = config.pricing.lookup("my-model");
        assert_eq!(rates.input, 1.5);
        assert_eq!(rates.output, 3.0);
        // Default entry is all-zero unless overridden
        assert_eq!(config.pricing.lookup("unknown").input, 0.0);
    }

    #[test]
    fn database_path_defaults() {
        let config = Config::parse_str(
            r#"
            [upstream]
            url = "https://api.example.com"

            [database]
            "#,
        )
        .unwrap();
        assert_eq!(config.database().path, "./tollgate.db");
    }
}
