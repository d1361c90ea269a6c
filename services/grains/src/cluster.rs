//! Chat Cluster
//!
//! Wires the chat actors to one [`ActorSystem`] and one message
//! [`StreamProvider`], with hosting settings taken from [`ActorsConfig`].

use crate::channel::ChannelActor;
use crate::client::ClientActor;
use crate::subscriptions::{SubscriptionRegistry, REGISTRY_KEY};

use chat_config::{ActorsConfig, ChatConfig};
use chat_types::Message;
use std::time::Duration;
use tracing::info;
use virtual_actors::{ActorRef, ActorResult, ActorSystem, HostConfig, StreamProvider};

/// Name of the provider carrying channel messages
pub const MESSAGE_STREAM_PROVIDER: &str = "chat-messages";

/// Actor system and stream provider hosting every chat actor
#[derive(Debug, Clone)]
pub struct ChatCluster {
    system: ActorSystem,
    streams: StreamProvider<Message>,
    shutdown_timeout: Duration,
}

impl ChatCluster {
    pub fn new(config: &ChatConfig) -> ActorResult<Self> {
        let system = ActorSystem::new();
        let streams = StreamProvider::new(MESSAGE_STREAM_PROVIDER);
        let actors = &config.actors;

        let provider = streams.clone();
        system.register::<ChannelActor, _>(
            host_config(actors, actors.channel_idle_timeout()),
            move |name: &String| ChannelActor::new(name.clone(), provider.clone()),
        )?;

        let default_username = config.chat.default_username.clone();
        system.register::<ClientActor, _>(
            host_config(actors, actors.client_idle_timeout()),
            move |_identity: &String| ClientActor::new(default_username.clone()),
        )?;

        system.register::<SubscriptionRegistry, _>(
            host_config(actors, actors.registry_idle_timeout()),
            |_key: &String| SubscriptionRegistry::new(),
        )?;

        info!(system_id = %system.system_id(), "Chat cluster ready");

        Ok(Self {
            system,
            streams,
            shutdown_timeout: actors.shutdown_timeout(),
        })
    }

    pub fn client(&self, identity: &str) -> ActorResult<ActorRef<ClientActor>> {
        self.system.actor_ref::<ClientActor>(identity.to_string())
    }

    pub fn channel(&self, name: &str) -> ActorResult<ActorRef<ChannelActor>> {
        self.system.actor_ref::<ChannelActor>(name.to_string())
    }

    pub fn subscriptions(&self) -> ActorResult<ActorRef<SubscriptionRegistry>> {
        self.system
            .actor_ref::<SubscriptionRegistry>(REGISTRY_KEY.to_string())
    }

    pub fn streams(&self) -> &StreamProvider<Message> {
        &self.streams
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Retire every actor, then close the stream provider. Channels complete
    /// their streams as they retire, so subscribers see the end of stream.
    pub async fn shutdown(&self) -> bool {
        let drained = self.system.shutdown(self.shutdown_timeout).await;
        self.streams.shutdown();
        drained
    }
}

fn host_config(actors: &ActorsConfig, idle_timeout: Option<Duration>) -> HostConfig {
    HostConfig::default()
        .with_idle_timeout(idle_timeout)
        .with_max_dispatch_attempts(actors.max_dispatch_attempts)
}
