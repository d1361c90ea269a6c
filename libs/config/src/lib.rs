//! # Chat Server Configuration
//!
//! Typed configuration for the chat server, layered from built-in defaults,
//! an optional TOML file and `CHAT__SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chat_config::ChatConfig;
//!
//! let config = ChatConfig::load(Some("~/.config/chat/server.toml")).unwrap();
//! println!("listening on {}", config.server.socket_addr());
//! ```

pub mod service_config;

pub use service_config::{
    ActorsConfig, ChatConfig, ChatSettings, LoggingConfig, ServerConfig, ENV_PREFIX,
};
