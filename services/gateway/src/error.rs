//! Error types for the chat gateway

use thiserror::Error;
use virtual_actors::{ActorError, StreamError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Maximum connections reached ({max})")]
    ConnectionLimit { max: usize },

    #[error("Connection rejected: missing access_token")]
    MissingIdentity,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
