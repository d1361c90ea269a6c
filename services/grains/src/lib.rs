//! # Chat Grains
//!
//! Keyed actors behind the chat server:
//!
//! - [`ChannelActor`] (key: channel name) owns members, history and the
//!   channel's message stream
//! - [`ClientActor`] (key: caller identity) owns a display name and the set
//!   of channels the caller joined
//! - [`SubscriptionRegistry`] (single instance) remembers which stream
//!   subscriptions belong to which caller, so a disconnect can undo exactly
//!   what that caller subscribed to
//!
//! Each actor is driven through an extension trait on its [`ActorRef`]
//! ([`ChannelApi`], [`ClientApi`], [`SubscriptionRegistryApi`]).
//! [`ChatCluster`] registers all three with one actor system and one stream
//! provider.
//!
//! [`ActorRef`]: virtual_actors::ActorRef

pub mod channel;
pub mod client;
pub mod cluster;
pub mod subscriptions;

pub use channel::{ChannelActor, ChannelApi, ChannelRequest};
pub use client::{ClientActor, ClientApi, ClientRequest, LeaveAllReport};
pub use cluster::{ChatCluster, MESSAGE_STREAM_PROVIDER};
pub use subscriptions::{
    SubscriptionRegistry, SubscriptionRegistryApi, SubscriptionRequest, REGISTRY_KEY,
};
