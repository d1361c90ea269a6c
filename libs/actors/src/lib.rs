//! Virtual Actor Runtime
//!
//! In-process runtime for keyed, single-writer actors. An actor is addressed
//! by type and key; the runtime activates it on first use, serializes every
//! request through one mailbox, and retires it when asked, when idle, or on
//! failure. A retired actor is reactivated from a fresh instance the next
//! time it is addressed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │       ActorSystem        │      │     ActorHost<Channel>       │
//! │                          │      │                              │
//! │  actor_ref::<Channel>()  │─────▶│  directory: key → activation │
//! │  TypeId → host           │      │     "general" ─▶ task+mailbox│
//! └──────────────────────────┘      │     "random"  ─▶ task+mailbox│
//!                                   └──────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │ StreamProvider<T>: StreamId → subscriptions (queue + task)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use virtual_actors::{ActorSystem, HostConfig};
//!
//! let system = ActorSystem::new();
//! system.register::<Counter, _>(HostConfig::default(), |_key| Counter::default())?;
//!
//! let counter = system.actor_ref::<Counter>("hits".to_string())?;
//! let total = counter.call(|reply| CounterRequest::Increment { reply }).await?;
//! ```

pub mod error;
pub mod host;
pub mod registry;
pub mod streams;
pub mod system;

pub use error::{ActorError, ActorResult, StreamError, StreamResult};
pub use host::{HostConfig, HostMetrics, HostStats};
pub use registry::{ActivationId, ActorKey};
pub use streams::{HandleId, StreamId, StreamObserver, StreamProvider, SubscriptionHandle};
pub use system::{ActorContext, ActorRef, ActorSystem, Reply, SupervisorDirective, VirtualActor};
