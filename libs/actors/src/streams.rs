//! # Stream Provider - Publish/Subscribe Fan-Out
//!
//! Named streams keyed by [`StreamId`]. A producer publishes items; every
//! live subscription on that stream receives them in publish order. Streams
//! exist implicitly: publishing to a stream nobody subscribed to is a no-op,
//! and subscribing creates the stream's entry on demand.
//!
//! ## Delivery
//!
//! Each subscription owns an unbounded queue drained by its own task, which
//! hands items to the subscriber's [`StreamObserver`] one at a time. Publish
//! never waits on a subscriber, and a slow subscriber only delays itself.
//! An observer that fails `on_next` is dropped from the stream and told so
//! through `on_error`.
//!
//! ## Handles
//!
//! `subscribe` returns a [`SubscriptionHandle`], the only way to cancel that
//! registration later. Unsubscribing a handle that is already gone returns
//! `Ok(false)`, so teardown paths can be repeated safely.

use crate::error::{StreamError, StreamResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Placeholder that names no stream
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0.simple())
    }
}

/// Identifies one subscription, independent of its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0.simple())
    }
}

/// Token for one subscriber's registration on one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    stream_id: StreamId,
    handle_id: HandleId,
}

impl SubscriptionHandle {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }
}

/// Receives the items of one subscription
#[async_trait]
pub trait StreamObserver<T>: Send + Sync + 'static {
    /// Next item, in publish order
    async fn on_next(&self, item: T) -> StreamResult<()>;

    /// The stream ended; no further items follow
    async fn on_completed(&self) {}

    /// `on_next` failed and the provider dropped this subscription
    async fn on_error(&self, _error: StreamError) {}
}

enum StreamEvent<T> {
    Item(T),
    Completed,
}

struct Subscription<T> {
    handle: SubscriptionHandle,
    queue: mpsc::UnboundedSender<StreamEvent<T>>,
}

type StreamTable<T> = DashMap<StreamId, Vec<Subscription<T>>>;

/// Publish/subscribe provider for items of type `T`
pub struct StreamProvider<T> {
    name: Arc<str>,
    streams: Arc<StreamTable<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for StreamProvider<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            streams: Arc::clone(&self.streams),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> fmt::Debug for StreamProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProvider")
            .field("name", &self.name)
            .field("streams", &self.streams.len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Clone + Send + 'static> StreamProvider<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        info!("Creating stream provider: {}", name);
        Self {
            name: name.into(),
            streams: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::provider_closed(self.name.as_ref()));
        }
        Ok(())
    }

    /// Queue `item` to every live subscription; returns how many received it
    pub fn publish(&self, stream_id: StreamId, item: T) -> StreamResult<usize> {
        self.ensure_open()?;

        let mut delivered = 0;
        if let Some(mut subscriptions) = self.streams.get_mut(&stream_id) {
            subscriptions.retain(|subscription| {
                match subscription.queue.send(StreamEvent::Item(item.clone())) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => {
                        debug!(
                            stream_id = %stream_id,
                            handle_id = %subscription.handle.handle_id,
                            "Dropping subscription with closed delivery queue"
                        );
                        false
                    }
                }
            });
        }
        Ok(delivered)
    }

    /// Register `observer` on `stream_id`
    pub fn subscribe<O>(&self, stream_id: StreamId, observer: O) -> StreamResult<SubscriptionHandle>
    where
        O: StreamObserver<T>,
    {
        self.subscribe_with(stream_id, |_| observer)
    }

    /// Register the observer built by `make_observer`, which receives the
    /// handle of the subscription it will serve
    pub fn subscribe_with<O, F>(
        &self,
        stream_id: StreamId,
        make_observer: F,
    ) -> StreamResult<SubscriptionHandle>
    where
        O: StreamObserver<T>,
        F: FnOnce(SubscriptionHandle) -> O,
    {
        self.ensure_open()?;

        let handle = SubscriptionHandle {
            stream_id,
            handle_id: HandleId::new(),
        };
        let (queue, receiver) = mpsc::unbounded_channel();

        tokio::spawn(deliver(
            handle,
            make_observer(handle),
            receiver,
            Arc::clone(&self.streams),
        ));

        self.streams
            .entry(stream_id)
            .or_default()
            .push(Subscription { handle, queue });

        debug!(
            provider = %self.name,
            stream_id = %stream_id,
            handle_id = %handle.handle_id,
            "Subscribed"
        );
        Ok(handle)
    }

    /// Every live subscription on `stream_id`
    pub fn subscription_handles(
        &self,
        stream_id: StreamId,
    ) -> StreamResult<Vec<SubscriptionHandle>> {
        self.ensure_open()?;
        Ok(self
            .streams
            .get(&stream_id)
            .map(|subscriptions| subscriptions.iter().map(|s| s.handle).collect())
            .unwrap_or_default())
    }

    /// Cancel a subscription; `Ok(false)` if it was already gone
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> StreamResult<bool> {
        self.ensure_open()?;
        let removed = remove_subscription(&self.streams, handle);
        if removed {
            debug!(
                provider = %self.name,
                stream_id = %handle.stream_id,
                handle_id = %handle.handle_id,
                "Unsubscribed"
            );
        }
        Ok(removed)
    }

    /// End `stream_id`: every subscriber gets `on_completed` after the items
    /// already queued to it. Returns how many subscriptions were ended.
    pub fn complete(&self, stream_id: StreamId) -> usize {
        match self.streams.remove(&stream_id) {
            Some((_, subscriptions)) => {
                let ended = subscriptions.len();
                for subscription in subscriptions {
                    let _ = subscription.queue.send(StreamEvent::Completed);
                }
                debug!(provider = %self.name, stream_id = %stream_id, ended, "Stream completed");
                ended
            }
            None => 0,
        }
    }

    /// Close the provider and complete every stream
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stream_ids: Vec<StreamId> = self.streams.iter().map(|entry| *entry.key()).collect();
        let ended: usize = stream_ids.into_iter().map(|id| self.complete(id)).sum();
        info!(provider = %self.name, subscriptions = ended, "Stream provider shut down");
    }

    /// Number of live subscriptions across all streams
    pub fn subscription_count(&self) -> usize {
        self.streams.iter().map(|entry| entry.value().len()).sum()
    }
}

fn remove_subscription<T>(streams: &StreamTable<T>, handle: &SubscriptionHandle) -> bool {
    let mut removed = false;
    if let Some(mut subscriptions) = streams.get_mut(&handle.stream_id) {
        let before = subscriptions.len();
        subscriptions.retain(|s| s.handle.handle_id != handle.handle_id);
        removed = subscriptions.len() != before;
    }
    streams.remove_if(&handle.stream_id, |_, subscriptions| subscriptions.is_empty());
    removed
}

/// Delivery loop for one subscription
async fn deliver<T, O>(
    handle: SubscriptionHandle,
    observer: O,
    mut receiver: mpsc::UnboundedReceiver<StreamEvent<T>>,
    streams: Arc<StreamTable<T>>,
) where
    T: Send + 'static,
    O: StreamObserver<T>,
{
    while let Some(event) = receiver.recv().await {
        match event {
            StreamEvent::Item(item) => {
                if let Err(e) = observer.on_next(item).await {
                    warn!(
                        stream_id = %handle.stream_id,
                        handle_id = %handle.handle_id,
                        error = %e,
                        "Observer failed, dropping subscription"
                    );
                    remove_subscription(&streams, &handle);
                    observer.on_error(e).await;
                    return;
                }
            }
            StreamEvent::Completed => {
                observer.on_completed().await;
                return;
            }
        }
    }
}
