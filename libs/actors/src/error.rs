//! Runtime Error Types
//!
//! Failures surfaced by the actor runtime and the stream provider. Not-found
//! conditions inside actor logic are modelled as no-ops by the actors
//! themselves and never reach this taxonomy.

use thiserror::Error;

/// Errors raised by the stream provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Provider has been shut down
    #[error("Stream provider '{provider}' is closed")]
    ProviderClosed { provider: String },

    /// Subscriber side went away while an item was being delivered
    #[error("Stream observer closed: {message}")]
    ObserverClosed { message: String },
}

/// Result type alias for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

impl StreamError {
    /// Create a provider closed error
    pub fn provider_closed(provider: impl Into<String>) -> Self {
        Self::ProviderClosed {
            provider: provider.into(),
        }
    }

    /// Create an observer closed error
    pub fn observer_closed(message: impl Into<String>) -> Self {
        Self::ObserverClosed {
            message: message.into(),
        }
    }
}

/// Main actor runtime error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// No host registered for the requested actor type
    #[error("Actor type '{actor_type}' is not registered")]
    NotRegistered { actor_type: &'static str },

    /// A host for this actor type already exists
    #[error("Actor type '{actor_type}' is already registered")]
    AlreadyRegistered { actor_type: &'static str },

    /// Request could not be delivered to any activation
    #[error("Actor {actor_type}/{key} unavailable after {attempts} dispatch attempts")]
    Unavailable {
        actor_type: &'static str,
        key: String,
        attempts: u32,
    },

    /// Activation finished without answering the request
    #[error("Actor {actor_type}/{key} dropped the reply")]
    ReplyDropped { actor_type: &'static str, key: String },

    /// `on_activate` failed
    #[error("Activation of {actor_type}/{key} failed: {message}")]
    ActivationFailed {
        actor_type: &'static str,
        key: String,
        message: String,
    },

    /// Failure reported by actor logic while handling a request
    #[error("Actor handler error: {message}")]
    Handler { message: String },

    /// Stream transport failure
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Result type alias for actor operations
pub type ActorResult<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create an unavailable error
    pub fn unavailable(actor_type: &'static str, key: impl ToString, attempts: u32) -> Self {
        Self::Unavailable {
            actor_type,
            key: key.to_string(),
            attempts,
        }
    }

    /// Create a reply dropped error
    pub fn reply_dropped(actor_type: &'static str, key: impl ToString) -> Self {
        Self::ReplyDropped {
            actor_type,
            key: key.to_string(),
        }
    }

    /// Create an activation failure
    pub fn activation_failed(
        actor_type: &'static str,
        key: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::ActivationFailed {
            actor_type,
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Short machine-readable category, used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::NotRegistered { .. } => "not_registered",
            ActorError::AlreadyRegistered { .. } => "already_registered",
            ActorError::Unavailable { .. } => "unavailable",
            ActorError::ReplyDropped { .. } => "reply_dropped",
            ActorError::ActivationFailed { .. } => "activation_failed",
            ActorError::Handler { .. } => "handler",
            ActorError::Stream(_) => "stream",
        }
    }

    /// Whether the failure came from the runtime or transport rather than
    /// from actor logic or misconfiguration
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ActorError::Unavailable { .. }
                | ActorError::ReplyDropped { .. }
                | ActorError::ActivationFailed { .. }
                | ActorError::Stream(_)
        )
    }
}
