//! Relays one channel's stream to one session

use crate::protocol::ServerEvent;

use async_trait::async_trait;
use chat_grains::{SubscriptionRegistry, SubscriptionRegistryApi};
use chat_types::Message;
use tokio::sync::mpsc;
use tracing::debug;
use virtual_actors::{ActorRef, StreamError, StreamObserver, StreamResult, SubscriptionHandle};

/// Forwards channel messages to a session's outbound queue as
/// `send.message` events. When the provider ends the subscription on its own
/// (stream completed, or delivery failed) the handle is released from the
/// owner's registry entry.
pub struct ChannelObserver {
    channel: String,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    identity: String,
    handle: SubscriptionHandle,
    registry: ActorRef<SubscriptionRegistry>,
}

impl ChannelObserver {
    pub fn new(
        channel: impl Into<String>,
        outbound: mpsc::UnboundedSender<ServerEvent>,
        identity: impl Into<String>,
        handle: SubscriptionHandle,
        registry: ActorRef<SubscriptionRegistry>,
    ) -> Self {
        Self {
            channel: channel.into(),
            outbound,
            identity: identity.into(),
            handle,
            registry,
        }
    }

    async fn release(&self) {
        // An inactive registry holds no entries to release
        if !self.registry.is_active() {
            return;
        }
        if let Err(e) = self
            .registry
            .remove_subscription(&self.identity, self.handle.handle_id())
            .await
        {
            debug!(
                identity = %self.identity,
                handle_id = %self.handle.handle_id(),
                error = %e,
                "Could not release subscription"
            );
        }
    }
}

#[async_trait]
impl StreamObserver<Message> for ChannelObserver {
    async fn on_next(&self, message: Message) -> StreamResult<()> {
        self.outbound
            .send(ServerEvent::Message {
                channel: self.channel.clone(),
                message,
            })
            .map_err(|_| StreamError::observer_closed(format!("session left {}", self.channel)))
    }

    async fn on_completed(&self) {
        debug!(
            channel = %self.channel,
            stream_id = %self.handle.stream_id(),
            "Channel stream ended"
        );
        self.release().await;
    }

    async fn on_error(&self, _error: StreamError) {
        self.release().await;
    }
}
