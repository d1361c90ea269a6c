//! Channel Actor
//!
//! One activation per channel name. Holds the member set and the message
//! history, and publishes every chat line and presence notification to the
//! channel's stream. Only chat lines sent through [`ChannelApi::send`] are
//! stored; presence notifications are published but never kept.

use async_trait::async_trait;
use chat_types::Message;
use std::collections::BTreeSet;
use tracing::debug;
use virtual_actors::{
    ActorContext, ActorRef, ActorResult, Reply, StreamId, StreamProvider, VirtualActor,
};

/// Requests accepted by [`ChannelActor`]
#[derive(Debug)]
pub enum ChannelRequest {
    Join {
        nickname: String,
        reply: Reply<StreamId>,
    },
    Leave {
        nickname: String,
        reply: Reply<StreamId>,
    },
    UpdateUsername {
        old: String,
        new: String,
        reply: Reply<()>,
    },
    Send {
        message: Message,
        reply: Reply<bool>,
    },
    ReadHistory {
        max_count: usize,
        reply: Reply<Vec<Message>>,
    },
    GetMembers {
        reply: Reply<Vec<String>>,
    },
}

pub struct ChannelActor {
    name: String,
    members: BTreeSet<String>,
    history: Vec<Message>,
    /// Nil until `on_activate` assigns the stream for this activation
    stream_id: StreamId,
    streams: StreamProvider<Message>,
}

impl ChannelActor {
    pub fn new(name: impl Into<String>, streams: StreamProvider<Message>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
            history: Vec::new(),
            stream_id: StreamId::nil(),
            streams,
        }
    }

    fn publish(&self, message: Message) -> ActorResult<()> {
        let delivered = self.streams.publish(self.stream_id, message)?;
        debug!(
            channel = %self.name,
            stream_id = %self.stream_id,
            delivered,
            "Published to channel stream"
        );
        Ok(())
    }

    fn join(&mut self, nickname: String) -> ActorResult<StreamId> {
        let notice = Message::system(format!("{} has joined the channel", nickname));
        self.members.insert(nickname);
        self.publish(notice)?;
        Ok(self.stream_id)
    }

    fn leave(&mut self, nickname: String) -> ActorResult<StreamId> {
        self.members.remove(&nickname);
        self.publish(Message::system(format!("{} has left the channel", nickname)))?;
        Ok(self.stream_id)
    }

    fn update_username(&mut self, old: String, new: String) -> ActorResult<()> {
        let notice = Message::system(format!("{} has changed username to {}", old, new));
        if self.members.remove(&old) {
            self.members.insert(new);
        }
        self.publish(notice)
    }

    fn send(&mut self, message: Message) -> ActorResult<bool> {
        self.history.push(message.clone());
        self.publish(message)?;
        Ok(true)
    }

    /// Last `max_count` messages by creation time, oldest first. Messages
    /// with equal timestamps keep the order they were sent in.
    fn read_history(&self, max_count: usize) -> Vec<Message> {
        let mut ordered = self.history.clone();
        ordered.sort_by_key(|message| message.created());
        let skip = ordered.len().saturating_sub(max_count);
        ordered.split_off(skip)
    }

    fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}

#[async_trait]
impl VirtualActor for ChannelActor {
    type Key = String;
    type Request = ChannelRequest;

    async fn on_activate(&mut self, ctx: &ActorContext<String>) -> ActorResult<()> {
        self.stream_id = StreamId::new();
        debug!(
            channel = %ctx.key(),
            stream_id = %self.stream_id,
            "Channel activated"
        );
        Ok(())
    }

    async fn handle(
        &mut self,
        request: ChannelRequest,
        _ctx: &ActorContext<String>,
    ) -> ActorResult<()> {
        match request {
            ChannelRequest::Join { nickname, reply } => reply.respond(self.join(nickname)),
            ChannelRequest::Leave { nickname, reply } => reply.respond(self.leave(nickname)),
            ChannelRequest::UpdateUsername { old, new, reply } => {
                reply.respond(self.update_username(old, new))
            }
            ChannelRequest::Send { message, reply } => reply.respond(self.send(message)),
            ChannelRequest::ReadHistory { max_count, reply } => {
                reply.ok(self.read_history(max_count));
                Ok(())
            }
            ChannelRequest::GetMembers { reply } => {
                reply.ok(self.members());
                Ok(())
            }
        }
    }

    async fn on_deactivate(&mut self, _ctx: &ActorContext<String>) -> ActorResult<()> {
        let ended = self.streams.complete(self.stream_id);
        debug!(
            channel = %self.name,
            stream_id = %self.stream_id,
            subscriptions = ended,
            "Channel stream completed"
        );
        Ok(())
    }
}

/// Typed calls on a channel reference
#[async_trait]
pub trait ChannelApi {
    /// Add `nickname` to the members and announce it; returns the stream id
    async fn join(&self, nickname: &str) -> ActorResult<StreamId>;

    /// Remove `nickname` if present and announce it; returns the stream id
    async fn leave(&self, nickname: &str) -> ActorResult<StreamId>;

    /// Replace `old` with `new` if `old` is a member; always announced
    async fn update_username(&self, old: &str, new: &str) -> ActorResult<()>;

    /// Store and publish a chat line
    async fn send(&self, message: Message) -> ActorResult<bool>;

    async fn read_history(&self, max_count: usize) -> ActorResult<Vec<Message>>;

    async fn get_members(&self) -> ActorResult<Vec<String>>;
}

#[async_trait]
impl ChannelApi for ActorRef<ChannelActor> {
    async fn join(&self, nickname: &str) -> ActorResult<StreamId> {
        let nickname = nickname.to_string();
        self.call(|reply| ChannelRequest::Join { nickname, reply })
            .await
    }

    async fn leave(&self, nickname: &str) -> ActorResult<StreamId> {
        let nickname = nickname.to_string();
        self.call(|reply| ChannelRequest::Leave { nickname, reply })
            .await
    }

    async fn update_username(&self, old: &str, new: &str) -> ActorResult<()> {
        let (old, new) = (old.to_string(), new.to_string());
        self.call(|reply| ChannelRequest::UpdateUsername { old, new, reply })
            .await
    }

    async fn send(&self, message: Message) -> ActorResult<bool> {
        self.call(|reply| ChannelRequest::Send { message, reply })
            .await
    }

    async fn read_history(&self, max_count: usize) -> ActorResult<Vec<Message>> {
        self.call(|reply| ChannelRequest::ReadHistory { max_count, reply })
            .await
    }

    async fn get_members(&self) -> ActorResult<Vec<String>> {
        self.call(|reply| ChannelRequest::GetMembers { reply }).await
    }
}
