//! Configuration for the Bayeux client
//!
//! Settings are read from a TOML file with a `[client]` section and an
//! optional `[reconnect]` section, validated once at load time, and turned
//! into runtime [`ClientOptions`] with [`ClientConfig::options`].

use crate::bayeux::{ClientOptions, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub client: ClientSection,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

/// `[client]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Bayeux endpoint, `ws://` or `wss://`
    pub url: String,
    /// Seconds between `/meta/connect` heartbeats (default: 30)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds after a heartbeat before the link counts as stalled (default: 10)
    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Sent verbatim as the handshake `ext` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_ext: Option<Map<String, Value>>,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_grace() -> u64 {
    10
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration for `url` with every default
    pub fn for_url(url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            client: ClientSection {
                url: url.to_string(),
                heartbeat_interval_secs: default_heartbeat_interval(),
                heartbeat_grace_secs: default_heartbeat_grace(),
                handshake_timeout_secs: default_handshake_timeout(),
                connect_timeout_secs: default_connect_timeout(),
                handshake_ext: None,
            },
            reconnect: ReconnectPolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_url()?;

        let client = &self.client;
        for (name, value) in [
            ("heartbeat_interval_secs", client.heartbeat_interval_secs),
            ("heartbeat_grace_secs", client.heartbeat_grace_secs),
            ("handshake_timeout_secs", client.handshake_timeout_secs),
            ("connect_timeout_secs", client.connect_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        self.reconnect
            .validate()
            .map_err(ConfigError::InvalidConfig)
    }

    /// Parsed server URL; only WebSocket schemes are accepted
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.client.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {e}", self.client.url)))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(ConfigError::InvalidUrl(format!(
                "'{}': scheme must be ws or wss, got {scheme}",
                self.client.url
            ))),
        }
    }

    /// Runtime options for [`crate::bayeux::BayeuxClient`]
    pub fn options(&self) -> Result<ClientOptions, ConfigError> {
        let client = &self.client;
        let mut options = ClientOptions::new(self.server_url()?)
            .with_heartbeat(
                Duration::from_secs(client.heartbeat_interval_secs),
                Duration::from_secs(client.heartbeat_grace_secs),
            )
            .with_handshake_timeout(Duration::from_secs(client.handshake_timeout_secs))
            .with_reconnect(self.reconnect.clone());
        options.connect_timeout = Duration::from_secs(client.connect_timeout_secs);
        if let Some(ext) = &client.handshake_ext {
            options = options.with_handshake_ext(ext.clone());
        }
        Ok(options)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[client]
url = "ws://localhost:8080/cometd"
heartbeat_interval_secs = 5
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
