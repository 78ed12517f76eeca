//! Server configuration loaded from TOML.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error};
use santorini_engine::UserId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::penalty::PenaltySettings;
use crate::session::StaticTokenVerifier;

/// Where matches are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite file through diesel.
    #[default]
    Sqlite,
    /// Process memory only.
    Memory,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(default)]
pub struct StorageConfig {
    backend: StorageBackend,
    database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: "santorini.db".to_string(),
        }
    }
}

/// Cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(default)]
pub struct CacheConfig {
    session_ttl_secs: i64,
    session_capacity: usize,
    match_ttl_secs: i64,
    match_capacity: usize,
}

impl CacheConfig {
    /// Session TTL.
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.session_ttl_secs)
    }

    /// Match-context TTL.
    pub fn match_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.match_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 30,
            session_capacity: 4096,
            match_ttl_secs: 120,
            match_capacity: 1024,
        }
    }
}

/// Automated opponent settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(default)]
pub struct AutomationConfig {
    /// Reply on the opponent's behalf within the same submission.
    enabled: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Static bearer token entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct TokenConfig {
    token: String,
    user_id: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(default)]
pub struct ServerConfig {
    host: String,
    port: u16,
    storage: StorageConfig,
    cache: CacheConfig,
    penalty: PenaltySettings,
    automation: AutomationConfig,
    tokens: Vec<TokenConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            penalty: PenaltySettings::default(),
            automation: AutomationConfig::default(),
            tokens: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        let config = Self::parse(&content)?;
        info!(host = %config.host, port = config.port, storage = %config.storage.backend, "Config loaded successfully");
        Ok(config)
    }

    /// Parses configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
    }

    /// Overrides the bind address.
    pub fn with_bind(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Overrides the storage settings.
    pub fn with_storage(mut self, backend: StorageBackend, database_path: impl Into<String>) -> Self {
        self.storage = StorageConfig {
            backend,
            database_path: database_path.into(),
        };
        self
    }

    /// Builds the token verifier from the configured table.
    pub fn token_verifier(&self) -> StaticTokenVerifier {
        self.tokens
            .iter()
            .fold(StaticTokenVerifier::new(), |verifier, entry| {
                verifier.with_token(
                    entry.token.clone(),
                    UserId::new(entry.user_id.clone()),
                    entry.expires_at,
                )
            })
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ServerConfig::parse("").expect("parse");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.cache().session_ttl(), TimeDelta::seconds(30));
        assert_eq!(*config.penalty().threshold(), 6);
    }

    #[test]
    fn test_partial_sections_and_tokens() {
        let config = ServerConfig::parse(
            r#"
            port = 8080

            [storage]
            backend = "memory"

            [penalty]
            threshold = 3

            [[tokens]]
            token = "alice-token"
            user_id = "alice"
            "#,
        )
        .expect("parse");
        assert_eq!(*config.port(), 8080);
        assert_eq!(*config.storage().backend(), StorageBackend::Memory);
        assert_eq!(*config.penalty().threshold(), 3);
        assert_eq!(*config.penalty().window_ms(), 10_000);
        assert_eq!(config.tokens().len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ServerConfig::parse("port = \"high\"").expect_err("type mismatch");
        assert!(err.message.contains("Failed to parse config"));
    }
}
