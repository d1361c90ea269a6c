//! Actor Host
//!
//! One host per registered actor type. The host owns the activation
//! directory, builds fresh instances through the registered factory, and runs
//! each activation as its own tokio task draining a private mailbox one turn
//! at a time.

use crate::error::{ActorError, ActorResult};
use crate::registry::{Activation, ActivationId, ActorDirectory, Envelope};
use crate::system::{ActorContext, ActorSystem, SupervisorDirective, VirtualActor};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-type hosting configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Retire an activation after this long without requests (None = never)
    pub idle_timeout: Option<Duration>,
    /// Redelivery attempts when a dead activation is found in the directory
    pub max_dispatch_attempts: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            max_dispatch_attempts: 3,
        }
    }
}

impl HostConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_dispatch_attempts(mut self, attempts: u32) -> Self {
        self.max_dispatch_attempts = attempts.max(1);
        self
    }
}

/// Host-wide counters
#[derive(Debug, Default)]
pub struct HostMetrics {
    pub activations: AtomicU64,
    pub activation_failures: AtomicU64,
    pub deactivations: AtomicU64,
    pub turns_processed: AtomicU64,
    pub turn_failures: AtomicU64,
    pub dispatch_retries: AtomicU64,
    pub total_turn_time_ns: AtomicU64,
}

impl HostMetrics {
    pub fn record_turn(&self, duration: Duration, success: bool) {
        self.turns_processed.fetch_add(1, Ordering::Relaxed);
        self.total_turn_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if !success {
            self.turn_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn avg_turn_time_ns(&self) -> f64 {
        let count = self.turns_processed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_turn_time_ns.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn snapshot(&self) -> HostStats {
        HostStats {
            activations: self.activations.load(Ordering::Relaxed),
            activation_failures: self.activation_failures.load(Ordering::Relaxed),
            deactivations: self.deactivations.load(Ordering::Relaxed),
            turns_processed: self.turns_processed.load(Ordering::Relaxed),
            turn_failures: self.turn_failures.load(Ordering::Relaxed),
            dispatch_retries: self.dispatch_retries.load(Ordering::Relaxed),
            avg_turn_time_ns: self.avg_turn_time_ns(),
        }
    }
}

/// Point-in-time copy of [`HostMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct HostStats {
    pub activations: u64,
    pub activation_failures: u64,
    pub deactivations: u64,
    pub turns_processed: u64,
    pub turn_failures: u64,
    pub dispatch_retries: u64,
    pub avg_turn_time_ns: f64,
}

type Factory<A> = dyn Fn(&<A as VirtualActor>::Key) -> A + Send + Sync;

/// Hosts every activation of one actor type
pub struct ActorHost<A: VirtualActor> {
    actor_type: &'static str,
    directory: Arc<ActorDirectory<A::Key, A::Request>>,
    factory: Arc<Factory<A>>,
    config: HostConfig,
    metrics: Arc<HostMetrics>,
}

impl<A: VirtualActor> ActorHost<A> {
    pub(crate) fn new<F>(config: HostConfig, factory: F) -> Self
    where
        F: Fn(&A::Key) -> A + Send + Sync + 'static,
    {
        Self {
            actor_type: A::type_name(),
            directory: Arc::new(ActorDirectory::new()),
            factory: Arc::new(factory),
            config,
            metrics: Arc::new(HostMetrics::default()),
        }
    }

    pub fn actor_type(&self) -> &'static str {
        self.actor_type
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<HostMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_active(&self, key: &A::Key) -> bool {
        self.directory.is_active(key)
    }

    pub fn active_count(&self) -> usize {
        self.directory.active_count()
    }

    /// Route a request to the activation for `key`, activating on demand
    pub(crate) fn dispatch(
        &self,
        system: &ActorSystem,
        key: &A::Key,
        request: A::Request,
    ) -> ActorResult<()> {
        let mut envelope = Envelope::Request(request);

        for attempt in 1..=self.config.max_dispatch_attempts {
            match self
                .directory
                .deliver(key, envelope, || self.spawn_activation(system, key))
            {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    envelope = returned;
                    self.metrics.dispatch_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        actor_type = self.actor_type,
                        key = %key,
                        attempt,
                        "Found dead activation, evicting before redelivery"
                    );
                    self.directory.evict_dead(key);
                }
            }
        }

        Err(ActorError::unavailable(
            self.actor_type,
            key,
            self.config.max_dispatch_attempts,
        ))
    }

    /// Ask the activation for `key` to retire; false if none is active
    pub(crate) fn request_deactivation(&self, key: &A::Key) -> bool {
        self.directory.deliver_existing(key, Envelope::Deactivate)
    }

    /// Ask every activation to retire; returns how many were asked
    pub(crate) fn request_deactivation_all(&self) -> usize {
        self.directory
            .keys()
            .iter()
            .filter(|key| self.request_deactivation(key))
            .count()
    }

    fn spawn_activation(&self, system: &ActorSystem, key: &A::Key) -> Activation<A::Request> {
        let (mailbox, receiver) = mpsc::unbounded_channel();
        let id = ActivationId::new();

        debug!(
            actor_type = self.actor_type,
            key = %key,
            activation_id = %id,
            "Activating actor"
        );

        let task = ActivationTask {
            actor_type: self.actor_type,
            actor: (self.factory)(key),
            ctx: ActorContext::new(key.clone(), id, system.clone()),
            receiver,
            directory: Arc::clone(&self.directory),
            idle_timeout: self.config.idle_timeout,
            metrics: Arc::clone(&self.metrics),
        };
        tokio::spawn(task.run());

        Activation { id, mailbox }
    }
}

/// A single activation: actor instance plus the mailbox it drains
struct ActivationTask<A: VirtualActor> {
    actor_type: &'static str,
    actor: A,
    ctx: ActorContext<A::Key>,
    receiver: mpsc::UnboundedReceiver<Envelope<A::Request>>,
    directory: Arc<ActorDirectory<A::Key, A::Request>>,
    idle_timeout: Option<Duration>,
    metrics: Arc<HostMetrics>,
}

impl<A: VirtualActor> ActivationTask<A> {
    async fn run(mut self) {
        let started = Instant::now();

        if let Err(e) = self.actor.on_activate(&self.ctx).await {
            self.metrics
                .activation_failures
                .fetch_add(1, Ordering::Relaxed);
            error!(
                actor_type = self.actor_type,
                key = %self.ctx.key(),
                activation_id = %self.ctx.activation_id(),
                error = %e,
                "Actor failed to activate"
            );
            // Queued callers observe the dropped replies; the next dispatch
            // evicts this entry and activates afresh.
            self.receiver.close();
            return;
        }
        self.metrics.activations.fetch_add(1, Ordering::Relaxed);

        let mut retire_requested = false;
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.receiver.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if self.try_retire() {
                            debug!(
                                actor_type = self.actor_type,
                                key = %self.ctx.key(),
                                idle_ms = idle.as_millis() as u64,
                                "Retiring idle activation"
                            );
                            break;
                        }
                        continue;
                    }
                },
                None => self.receiver.recv().await,
            };

            match next {
                Some(Envelope::Request(request)) => self.turn(request, &mut retire_requested).await,
                Some(Envelope::Deactivate) => retire_requested = true,
                None => break,
            }

            if retire_requested && self.try_retire() {
                break;
            }
        }

        if let Err(e) = self.actor.on_deactivate(&self.ctx).await {
            warn!(
                actor_type = self.actor_type,
                key = %self.ctx.key(),
                error = %e,
                "Actor failed to deactivate cleanly"
            );
        }
        self.metrics.deactivations.fetch_add(1, Ordering::Relaxed);

        info!(
            actor_type = self.actor_type,
            key = %self.ctx.key(),
            activation_id = %self.ctx.activation_id(),
            lifetime_ms = started.elapsed().as_millis() as u64,
            "Actor deactivated"
        );
    }

    async fn turn(&mut self, request: A::Request, retire_requested: &mut bool) {
        let start = Instant::now();
        match self.actor.handle(request, &self.ctx).await {
            Ok(()) => self.metrics.record_turn(start.elapsed(), true),
            Err(e) => {
                self.metrics.record_turn(start.elapsed(), false);
                error!(
                    actor_type = self.actor_type,
                    key = %self.ctx.key(),
                    error = %e,
                    error_category = e.category(),
                    "Actor turn failed"
                );
                match self.actor.on_error(&e) {
                    SupervisorDirective::Resume => {}
                    SupervisorDirective::Deactivate => *retire_requested = true,
                }
            }
        }
    }

    /// Leave the directory if nothing is waiting in the mailbox
    fn try_retire(&self) -> bool {
        let receiver = &self.receiver;
        self.directory
            .retire(self.ctx.key(), self.ctx.activation_id(), || receiver.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_builders() {
        let config = HostConfig::default()
            .with_idle_timeout(Some(Duration::from_secs(30)))
            .with_max_dispatch_attempts(0);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_dispatch_attempts, 1);
    }

    #[test]
    fn test_host_metrics() {
        let metrics = HostMetrics::default();
        assert_eq!(metrics.avg_turn_time_ns(), 0.0);

        metrics.record_turn(Duration::from_nanos(100), true);
        metrics.record_turn(Duration::from_nanos(300), false);

        let stats = metrics.snapshot();
        assert_eq!(stats.turns_processed, 2);
        assert_eq!(stats.turn_failures, 1);
        assert_eq!(stats.avg_turn_time_ns, 200.0);
    }
}
