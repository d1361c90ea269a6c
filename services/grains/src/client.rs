//! Client Actor
//!
//! One activation per caller identity. Tracks the caller's display name and
//! the channels it joined, and performs channel operations on the caller's
//! behalf. Channel calls are awaited in order inside the client's turn, so a
//! client never interleaves two of its own operations.

use crate::channel::{ChannelActor, ChannelApi};

use async_trait::async_trait;
use chat_types::Message;
use std::collections::BTreeSet;
use tracing::{debug, warn};
use virtual_actors::{
    ActorContext, ActorError, ActorRef, ActorResult, Reply, StreamId, VirtualActor,
};

/// Requests accepted by [`ClientActor`]
#[derive(Debug)]
pub enum ClientRequest {
    SetUsername {
        name: String,
        reply: Reply<()>,
    },
    JoinChannel {
        channel: String,
        reply: Reply<StreamId>,
    },
    LeaveChannel {
        channel: String,
        reply: Reply<StreamId>,
    },
    LeaveAllChannels {
        reply: Reply<LeaveAllReport>,
    },
    SendMessage {
        channel: String,
        text: String,
        reply: Reply<bool>,
    },
    GetChannels {
        reply: Reply<Vec<String>>,
    },
    ForgetChannel {
        channel: String,
        reply: Reply<bool>,
    },
    GetUsername {
        reply: Reply<String>,
    },
}

/// What one leave-all turn got through
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaveAllReport {
    /// Channels left, with the stream each one answered with, in join-set order
    pub left: Vec<(String, StreamId)>,
    /// The fault that stopped the sequence, if any
    pub fault: Option<ActorError>,
}

impl LeaveAllReport {
    /// The stream ids, or the fault if the sequence stopped early
    pub fn into_result(self) -> ActorResult<Vec<StreamId>> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.left.into_iter().map(|(_, stream_id)| stream_id).collect()),
        }
    }
}

pub struct ClientActor {
    user_name: String,
    joined_channels: BTreeSet<String>,
}

impl ClientActor {
    pub fn new(default_username: impl Into<String>) -> Self {
        Self {
            user_name: default_username.into(),
            joined_channels: BTreeSet::new(),
        }
    }

    fn channel(ctx: &ActorContext<String>, name: &str) -> ActorResult<ActorRef<ChannelActor>> {
        ctx.actor_ref::<ChannelActor>(name.to_string())
    }

    /// Rename in every joined channel, then locally. The first channel fault
    /// stops propagation; channels already renamed stay renamed and the new
    /// name is still committed here.
    async fn set_username(&mut self, ctx: &ActorContext<String>, name: String) -> ActorResult<()> {
        let mut outcome = Ok(());
        for channel in &self.joined_channels {
            let result = match Self::channel(ctx, channel) {
                Ok(channel_ref) => channel_ref.update_username(&self.user_name, &name).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(
                    identity = %ctx.key(),
                    channel = %channel,
                    error = %e,
                    "Rename propagation stopped"
                );
                outcome = Err(e);
                break;
            }
        }

        debug!(identity = %ctx.key(), old = %self.user_name, new = %name, "Username changed");
        self.user_name = name;
        outcome
    }

    async fn join_channel(
        &mut self,
        ctx: &ActorContext<String>,
        channel: String,
    ) -> ActorResult<StreamId> {
        self.joined_channels.insert(channel.clone());
        Self::channel(ctx, &channel)?.join(&self.user_name).await
    }

    async fn leave_channel(
        &self,
        ctx: &ActorContext<String>,
        channel: &str,
    ) -> ActorResult<StreamId> {
        Self::channel(ctx, channel)?.leave(&self.user_name).await
    }

    /// Leave joined channels in order until one faults. Channels left before
    /// the fault are reported with it.
    async fn leave_all_channels(&self, ctx: &ActorContext<String>) -> LeaveAllReport {
        let mut report = LeaveAllReport::default();
        for channel in &self.joined_channels {
            match self.leave_channel(ctx, channel).await {
                Ok(stream_id) => report.left.push((channel.clone(), stream_id)),
                Err(e) => {
                    warn!(
                        identity = %ctx.key(),
                        channel = %channel,
                        left = report.left.len(),
                        error = %e,
                        "Leave-all stopped"
                    );
                    report.fault = Some(e);
                    break;
                }
            }
        }
        report
    }

    async fn send_message(
        &self,
        ctx: &ActorContext<String>,
        channel: &str,
        text: String,
    ) -> ActorResult<bool> {
        Self::channel(ctx, channel)?
            .send(Message::new(self.user_name.clone(), text))
            .await
    }
}

#[async_trait]
impl VirtualActor for ClientActor {
    type Key = String;
    type Request = ClientRequest;

    async fn handle(
        &mut self,
        request: ClientRequest,
        ctx: &ActorContext<String>,
    ) -> ActorResult<()> {
        match request {
            ClientRequest::SetUsername { name, reply } => {
                reply.respond(self.set_username(ctx, name).await)
            }
            ClientRequest::JoinChannel { channel, reply } => {
                reply.respond(self.join_channel(ctx, channel).await)
            }
            ClientRequest::LeaveChannel { channel, reply } => {
                reply.respond(self.leave_channel(ctx, &channel).await)
            }
            ClientRequest::LeaveAllChannels { reply } => {
                let report = self.leave_all_channels(ctx).await;
                let outcome = report.fault.clone().map_or(Ok(()), Err);
                reply.ok(report);
                outcome
            }
            ClientRequest::SendMessage { channel, text, reply } => {
                reply.respond(self.send_message(ctx, &channel, text).await)
            }
            ClientRequest::GetChannels { reply } => {
                reply.ok(self.joined_channels.iter().cloned().collect());
                Ok(())
            }
            ClientRequest::ForgetChannel { channel, reply } => {
                reply.ok(self.joined_channels.remove(&channel));
                Ok(())
            }
            ClientRequest::GetUsername { reply } => {
                reply.ok(self.user_name.clone());
                Ok(())
            }
        }
    }
}

/// Typed calls on a client reference
#[async_trait]
pub trait ClientApi {
    async fn set_username(&self, name: &str) -> ActorResult<()>;

    /// Record the channel locally, then join it under the current name
    async fn join_channel(&self, channel: &str) -> ActorResult<StreamId>;

    /// Leave the channel; the channel stays in [`ClientApi::get_channels`]
    /// until [`ClientApi::forget_channel`]
    async fn leave_channel(&self, channel: &str) -> ActorResult<StreamId>;

    /// Leave every joined channel in order, stopping at the first fault
    async fn leave_all_channels(&self) -> ActorResult<Vec<StreamId>>;

    /// Same turn as [`ClientApi::leave_all_channels`], reporting each channel
    /// left with its stream and any fault alongside the partial progress
    async fn leave_all_channels_report(&self) -> ActorResult<LeaveAllReport>;

    async fn send_message(&self, channel: &str, text: &str) -> ActorResult<bool>;

    async fn get_channels(&self) -> ActorResult<Vec<String>>;

    /// Drop a channel from the joined set; false if it was not there
    async fn forget_channel(&self, channel: &str) -> ActorResult<bool>;

    async fn get_username(&self) -> ActorResult<String>;
}

#[async_trait]
impl ClientApi for ActorRef<ClientActor> {
    async fn set_username(&self, name: &str) -> ActorResult<()> {
        let name = name.to_string();
        self.call(|reply| ClientRequest::SetUsername { name, reply })
            .await
    }

    async fn join_channel(&self, channel: &str) -> ActorResult<StreamId> {
        let channel = channel.to_string();
        self.call(|reply| ClientRequest::JoinChannel { channel, reply })
            .await
    }

    async fn leave_channel(&self, channel: &str) -> ActorResult<StreamId> {
        let channel = channel.to_string();
        self.call(|reply| ClientRequest::LeaveChannel { channel, reply })
            .await
    }

    async fn leave_all_channels(&self) -> ActorResult<Vec<StreamId>> {
        self.leave_all_channels_report().await?.into_result()
    }

    async fn leave_all_channels_report(&self) -> ActorResult<LeaveAllReport> {
        self.call(|reply| ClientRequest::LeaveAllChannels { reply })
            .await
    }

    async fn send_message(&self, channel: &str, text: &str) -> ActorResult<bool> {
        let (channel, text) = (channel.to_string(), text.to_string());
        self.call(|reply| ClientRequest::SendMessage { channel, text, reply })
            .await
    }

    async fn get_channels(&self) -> ActorResult<Vec<String>> {
        self.call(|reply| ClientRequest::GetChannels { reply }).await
    }

    async fn forget_channel(&self, channel: &str) -> ActorResult<bool> {
        let channel = channel.to_string();
        self.call(|reply| ClientRequest::ForgetChannel { channel, reply })
            .await
    }

    async fn get_username(&self) -> ActorResult<String> {
        self.call(|reply| ClientRequest::GetUsername { reply }).await
    }
}
