//! Actor System Core
//!
//! Keyed, location-transparent actor references over per-type hosts. Callers
//! address an actor by type and key only; whether an activation currently
//! exists is the host's concern. Every activation processes one request to
//! completion before taking the next, so actor state needs no locks.
//!
//! # Request / reply
//!
//! Requests are plain enums whose variants carry a [`Reply`]. The actor
//! answers through it exactly once; a caller whose reply is dropped gets
//! [`ActorError::ReplyDropped`].
//!
//! ```rust,ignore
//! enum CounterRequest {
//!     Increment { by: u64, reply: Reply<u64> },
//! }
//!
//! let counter = system.actor_ref::<Counter>("hits".to_string())?;
//! let total = counter.call(|reply| CounterRequest::Increment { by: 1, reply }).await?;
//! ```

use crate::error::{ActorError, ActorResult};
use crate::host::{ActorHost, HostConfig, HostMetrics};
use crate::registry::{ActivationId, ActorKey};

use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Behaviour of a keyed virtual actor
#[async_trait]
pub trait VirtualActor: Send + Sized + 'static {
    /// Stable address of an instance
    type Key: ActorKey;
    /// Requests accepted by the mailbox
    type Request: Send + 'static;

    /// Short type name used in logs and errors
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Called once per activation, before the first request
    async fn on_activate(&mut self, _ctx: &ActorContext<Self::Key>) -> ActorResult<()> {
        Ok(())
    }

    /// Handle one request; the turn ends when this returns
    async fn handle(
        &mut self,
        request: Self::Request,
        ctx: &ActorContext<Self::Key>,
    ) -> ActorResult<()>;

    /// Called when the activation retires
    async fn on_deactivate(&mut self, _ctx: &ActorContext<Self::Key>) -> ActorResult<()> {
        Ok(())
    }

    /// Decide what happens after `handle` returned an error
    fn on_error(&mut self, _error: &ActorError) -> SupervisorDirective {
        SupervisorDirective::Resume
    }
}

/// Supervision directive for turn failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorDirective {
    /// Keep the activation and continue with the next request
    Resume,
    /// Retire the activation; the next request reactivates a fresh instance
    Deactivate,
}

/// Per-activation context handed to every lifecycle hook
#[derive(Clone)]
pub struct ActorContext<K: ActorKey> {
    key: K,
    activation_id: ActivationId,
    system: ActorSystem,
}

impl<K: ActorKey> ActorContext<K> {
    pub(crate) fn new(key: K, activation_id: ActivationId, system: ActorSystem) -> Self {
        Self {
            key,
            activation_id,
            system,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn activation_id(&self) -> ActivationId {
        self.activation_id
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Reference another actor by key
    pub fn actor_ref<B: VirtualActor>(&self, key: B::Key) -> ActorResult<ActorRef<B>> {
        self.system.actor_ref::<B>(key)
    }
}

impl<K: ActorKey> fmt::Debug for ActorContext<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("key", &self.key)
            .field("activation_id", &self.activation_id)
            .finish()
    }
}

/// One-shot answer channel carried inside a request
#[derive(Debug)]
pub struct Reply<T> {
    sender: oneshot::Sender<ActorResult<T>>,
}

impl<T> Reply<T> {
    fn channel() -> (Self, oneshot::Receiver<ActorResult<T>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Answer the caller. A caller that stopped waiting is not an error.
    pub fn send(self, result: ActorResult<T>) {
        if self.sender.send(result).is_err() {
            debug!("Caller went away before the reply was sent");
        }
    }

    pub fn ok(self, value: T) {
        self.send(Ok(value))
    }

    /// Answer the caller and return the outcome to the turn, so a failed
    /// request is also recorded as a failed turn
    pub fn respond(self, result: ActorResult<T>) -> ActorResult<()> {
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        };
        self.send(result);
        outcome
    }
}

/// Location-transparent reference to a keyed actor
pub struct ActorRef<A: VirtualActor> {
    key: A::Key,
    host: Arc<ActorHost<A>>,
    system: ActorSystem,
}

impl<A: VirtualActor> ActorRef<A> {
    pub fn key(&self) -> &A::Key {
        &self.key
    }

    /// Send a request and wait for the actor's answer
    pub async fn call<T, F>(&self, make_request: F) -> ActorResult<T>
    where
        F: FnOnce(Reply<T>) -> A::Request,
    {
        let (reply, answer) = Reply::channel();
        self.host
            .dispatch(&self.system, &self.key, make_request(reply))?;

        match answer.await {
            Ok(result) => result,
            Err(_) => Err(ActorError::reply_dropped(
                self.host.actor_type(),
                &self.key,
            )),
        }
    }

    /// Whether an activation for this key is currently resident
    pub fn is_active(&self) -> bool {
        self.host.is_active(&self.key)
    }
}

impl<A: VirtualActor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            host: Arc::clone(&self.host),
            system: self.system.clone(),
        }
    }
}

impl<A: VirtualActor> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("actor_type", &self.host.actor_type())
            .field("key", &self.key)
            .finish()
    }
}

/// Type-erased view of a host used for system-wide lifecycle operations
trait HostControl: Send + Sync {
    fn actor_type(&self) -> &'static str;
    fn request_deactivation_all(&self) -> usize;
    fn active_count(&self) -> usize;
}

impl<A: VirtualActor> HostControl for ActorHost<A> {
    fn actor_type(&self) -> &'static str {
        ActorHost::actor_type(self)
    }

    fn request_deactivation_all(&self) -> usize {
        ActorHost::request_deactivation_all(self)
    }

    fn active_count(&self) -> usize {
        ActorHost::active_count(self)
    }
}

struct RegisteredHost {
    host: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn HostControl>,
}

/// Core actor system: one host per registered actor type
#[derive(Clone)]
pub struct ActorSystem {
    hosts: Arc<DashMap<TypeId, RegisteredHost>>,
    system_id: Arc<str>,
}

impl ActorSystem {
    /// Create new actor system
    pub fn new() -> Self {
        let system_id = format!("system-{}", Uuid::new_v4().simple());
        info!("Creating new actor system: {}", system_id);

        Self {
            hosts: Arc::new(DashMap::new()),
            system_id: system_id.into(),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Register an actor type; `factory` builds a fresh instance per activation
    pub fn register<A, F>(&self, config: HostConfig, factory: F) -> ActorResult<()>
    where
        A: VirtualActor,
        F: Fn(&A::Key) -> A + Send + Sync + 'static,
    {
        let host = Arc::new(ActorHost::<A>::new(config, factory));

        match self.hosts.entry(TypeId::of::<A>()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ActorError::AlreadyRegistered {
                actor_type: A::type_name(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(
                    system_id = %self.system_id,
                    actor_type = A::type_name(),
                    idle_timeout_ms = host.config().idle_timeout.map(|d| d.as_millis() as u64),
                    "Registered actor type"
                );
                let control: Arc<dyn HostControl> = host.clone();
                let host: Arc<dyn Any + Send + Sync> = host;
                slot.insert(RegisteredHost { host, control });
                Ok(())
            }
        }
    }

    fn host<A: VirtualActor>(&self) -> ActorResult<Arc<ActorHost<A>>> {
        let not_registered = || ActorError::NotRegistered {
            actor_type: A::type_name(),
        };
        let erased = self
            .hosts
            .get(&TypeId::of::<A>())
            .map(|registered| Arc::clone(&registered.host))
            .ok_or_else(not_registered)?;
        erased
            .downcast::<ActorHost<A>>()
            .map_err(|_| not_registered())
    }

    /// Reference an actor by key; does not activate it
    pub fn actor_ref<A: VirtualActor>(&self, key: A::Key) -> ActorResult<ActorRef<A>> {
        Ok(ActorRef {
            key,
            host: self.host::<A>()?,
            system: self.clone(),
        })
    }

    /// Ask the activation for `key` to retire once its mailbox drains.
    /// Returns false if the key has no activation.
    pub fn deactivate<A: VirtualActor>(&self, key: &A::Key) -> ActorResult<bool> {
        Ok(self.host::<A>()?.request_deactivation(key))
    }

    pub fn is_active<A: VirtualActor>(&self, key: &A::Key) -> ActorResult<bool> {
        Ok(self.host::<A>()?.is_active(key))
    }

    pub fn active_count<A: VirtualActor>(&self) -> ActorResult<usize> {
        Ok(self.host::<A>()?.active_count())
    }

    pub fn metrics<A: VirtualActor>(&self) -> ActorResult<Arc<HostMetrics>> {
        Ok(self.host::<A>()?.metrics())
    }

    /// Retire every activation of every type, waiting up to `timeout`.
    /// Returns true if everything retired in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let controls: Vec<Arc<dyn HostControl>> = self
            .hosts
            .iter()
            .map(|entry| Arc::clone(&entry.value().control))
            .collect();

        for control in &controls {
            let asked = control.request_deactivation_all();
            debug!(
                actor_type = control.actor_type(),
                activations = asked,
                "Requested deactivation"
            );
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining: usize = controls.iter().map(|control| control.active_count()).sum();
            if remaining == 0 {
                info!(system_id = %self.system_id, "Actor system shut down");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    system_id = %self.system_id,
                    remaining,
                    "Actor system shutdown timed out with activations still resident"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("system_id", &self.system_id)
            .field("actor_types", &self.hosts.len())
            .finish()
    }
}
