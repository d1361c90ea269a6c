//! # Chat Gateway
//!
//! WebSocket front end for the chat cluster. Each connection is a session
//! bound to the caller identity carried in the `access_token` query
//! parameter. Requests arrive as JSON frames tagged by `type`; replies and
//! channel traffic leave as JSON frames tagged by `event`.
//!
//! ```text
//! ws://host:port/?access_token=<identity>
//!
//! → {"type": "join_channel", "channel": "general"}
//! ← {"event": "send.message", "channel": "general", "message": {...}}
//! ```

pub mod error;
pub mod hub;
pub mod observer;
pub mod protocol;
pub mod server;

pub use error::{GatewayError, Result};
pub use hub::{ChatHub, Session};
pub use observer::ChannelObserver;
pub use protocol::{ClientRequest, ServerEvent};
pub use server::ChatServer;
