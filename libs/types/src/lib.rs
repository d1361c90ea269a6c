//! # Chat Types
//!
//! Value types exchanged between chat actors, streams and the gateway. Every
//! type here is immutable once built and cheap to clone, so it can be passed
//! by value across actor boundaries.

pub mod message;

pub use message::{Message, SYSTEM_AUTHOR};
