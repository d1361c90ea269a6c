//! Service Configuration Module
//!
//! Loads [`ChatConfig`] from an optional TOML file with environment variable
//! overrides. Every section has defaults, so an empty file (or no file) is a
//! valid configuration.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix of environment overrides, e.g. `CHAT__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "CHAT";

const ENV_SEPARATOR: &str = "__";

/// Main chat server configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Chat behaviour
    pub chat: ChatSettings,

    /// Actor hosting
    pub actors: ActorsConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// WebSocket listener settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// `address:port` string suitable for binding
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChatSettings {
    /// Messages returned for a history request
    pub history_page_size: usize,
    /// Display name of a client that never set one
    pub default_username: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_page_size: 1000,
            default_username: "anonymous".to_string(),
        }
    }
}

/// Actor hosting settings; idle timeouts left unset keep activations resident
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ActorsConfig {
    pub channel_idle_timeout_secs: Option<u64>,
    pub client_idle_timeout_secs: Option<u64>,
    pub registry_idle_timeout_secs: Option<u64>,
    pub max_dispatch_attempts: u32,
    pub shutdown_timeout_ms: u64,
}

impl Default for ActorsConfig {
    fn default() -> Self {
        Self {
            channel_idle_timeout_secs: None,
            client_idle_timeout_secs: None,
            registry_idle_timeout_secs: None,
            max_dispatch_attempts: 3,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl ActorsConfig {
    pub fn channel_idle_timeout(&self) -> Option<Duration> {
        self.channel_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn client_idle_timeout(&self) -> Option<Duration> {
        self.client_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn registry_idle_timeout(&self) -> Option<Duration> {
        self.registry_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ChatConfig {
    /// Load configuration: defaults, then `path` if given (`~` is expanded),
    /// then `CHAT__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
            info!("Loading configuration file: {:?}", expanded);
            builder = builder.add_source(File::from(expanded).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: ChatConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ChatConfig = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to print the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.chat.history_page_size == 0 {
            bail!("chat.history_page_size must be at least 1");
        }
        if self.chat.default_username.trim().is_empty() {
            bail!("chat.default_username must not be empty");
        }
        if self.actors.max_dispatch_attempts == 0 {
            bail!("actors.max_dispatch_attempts must be at least 1");
        }
        Ok(())
    }
}
