//! Chat Hub
//!
//! Maps caller requests onto actor calls. A [`Session`] is one connected
//! caller: it owns the outbound event queue that channel observers write to,
//! and on disconnect it leaves every channel and cancels exactly the stream
//! subscriptions recorded for its identity.
//!
//! Several sessions may share one identity. Each keeps its own subscription
//! per joined stream, and every handle is recorded under the identity.

use crate::error::{GatewayError, Result};
use crate::observer::ChannelObserver;
use crate::protocol::{ClientRequest, ServerEvent};

use chat_grains::{
    ChannelApi, ChatCluster, ClientActor, ClientApi, LeaveAllReport, SubscriptionRegistryApi,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use virtual_actors::{ActorRef, StreamId, SubscriptionHandle};

/// Admits sessions and tracks the ones currently connected
pub struct ChatHub {
    cluster: ChatCluster,
    sessions: Arc<DashMap<Uuid, String>>,
    open: Arc<AtomicUsize>,
    history_page_size: usize,
    max_connections: usize,
}

impl ChatHub {
    pub fn new(cluster: ChatCluster, history_page_size: usize, max_connections: usize) -> Self {
        Self {
            cluster,
            sessions: Arc::new(DashMap::new()),
            open: Arc::new(AtomicUsize::new(0)),
            history_page_size,
            max_connections,
        }
    }

    pub fn cluster(&self) -> &ChatCluster {
        &self.cluster
    }

    pub fn session_count(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Open a session for `identity`; events for it arrive on the returned
    /// receiver
    pub fn connect(
        &self,
        identity: &str,
    ) -> Result<(Session, mpsc::UnboundedReceiver<ServerEvent>)> {
        let reserved = self
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < self.max_connections).then_some(open + 1)
            });
        let total_sessions = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => {
                return Err(GatewayError::ConnectionLimit {
                    max: self.max_connections,
                })
            }
        };

        let id = Uuid::new_v4();
        self.sessions.insert(id, identity.to_string());
        info!(session_id = %id, identity = %identity, total_sessions, "Session connected");

        let (outbound, events) = mpsc::unbounded_channel();
        let session = Session {
            id,
            identity: identity.to_string(),
            cluster: self.cluster.clone(),
            outbound,
            subscribed: DashMap::new(),
            history_page_size: self.history_page_size,
            sessions: Arc::clone(&self.sessions),
            open: Arc::clone(&self.open),
        };
        Ok((session, events))
    }
}

/// One connected caller
pub struct Session {
    id: Uuid,
    identity: String,
    cluster: ChatCluster,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    /// This session's own subscription per joined stream
    subscribed: DashMap<StreamId, SubscriptionHandle>,
    history_page_size: usize,
    sessions: Arc<DashMap<Uuid, String>>,
    open: Arc<AtomicUsize>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Handle one raw frame. Failures are reported to the caller as error
    /// events and never end the session.
    pub async fn handle_frame(&self, frame: &str) {
        match serde_json::from_str::<ClientRequest>(frame) {
            Ok(request) => {
                let kind = request.kind();
                if let Err(e) = self.handle(request).await {
                    warn!(
                        session_id = %self.id,
                        identity = %self.identity,
                        request = kind,
                        error = %e,
                        "Request failed"
                    );
                    self.emit(ServerEvent::Error {
                        request: Some(kind.to_string()),
                        message: e.to_string(),
                    });
                }
            }
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Unparseable frame");
                self.emit(ServerEvent::Error {
                    request: None,
                    message: format!("Invalid request: {}", e),
                });
            }
        }
    }

    pub async fn handle(&self, request: ClientRequest) -> Result<()> {
        match request {
            ClientRequest::GetChannelHistory { channel } => {
                let messages = self
                    .cluster
                    .channel(&channel)?
                    .read_history(self.history_page_size)
                    .await?;
                self.emit(ServerEvent::History { channel, messages });
            }
            ClientRequest::GetChannels => {
                let channels = self.cluster.client(&self.identity)?.get_channels().await?;
                self.emit(ServerEvent::Channels { channels });
            }
            ClientRequest::GetChannelMembers { channel } => {
                let members = self.cluster.channel(&channel)?.get_members().await?;
                self.emit(ServerEvent::Members { channel, members });
            }
            ClientRequest::JoinChannel { channel } => self.join_channel(channel).await?,
            ClientRequest::LeftChannel { channel } => self.leave_channel(&channel).await?,
            ClientRequest::SetUsername { name } => {
                self.cluster.client(&self.identity)?.set_username(&name).await?
            }
            ClientRequest::SendMessage { channel, text } => {
                self.cluster
                    .client(&self.identity)?
                    .send_message(&channel, &text)
                    .await?;
            }
        }
        Ok(())
    }

    async fn join_channel(&self, channel: String) -> Result<()> {
        let client = self.cluster.client(&self.identity)?;
        let stream_id = match client.join_channel(&channel).await {
            Ok(stream_id) => stream_id,
            Err(e) => {
                if let Err(rollback) = client.forget_channel(&channel).await {
                    warn!(
                        identity = %self.identity,
                        channel = %channel,
                        error = %rollback,
                        "Could not roll back failed join"
                    );
                }
                return Err(e.into());
            }
        };

        if self.live_subscription(stream_id)?.is_some() {
            debug!(session_id = %self.id, channel = %channel, "Already subscribed");
            return Ok(());
        }

        let registry = self.cluster.subscriptions()?;
        let handle = self.cluster.streams().subscribe_with(stream_id, |handle| {
            ChannelObserver::new(
                channel.clone(),
                self.outbound.clone(),
                self.identity.clone(),
                handle,
                registry.clone(),
            )
        })?;
        self.subscribed.insert(stream_id, handle);
        registry
            .add_subscription(&self.identity, handle.handle_id())
            .await?;

        info!(
            session_id = %self.id,
            identity = %self.identity,
            channel = %channel,
            stream_id = %stream_id,
            "Joined channel"
        );
        Ok(())
    }

    async fn leave_channel(&self, channel: &str) -> Result<()> {
        let client = self.cluster.client(&self.identity)?;
        let stream_id = client.leave_channel(channel).await?;
        self.release_channel(&client, channel, stream_id).await?;
        info!(identity = %self.identity, channel = %channel, "Left channel");
        Ok(())
    }

    async fn release_channel(
        &self,
        client: &ActorRef<ClientActor>,
        channel: &str,
        stream_id: StreamId,
    ) -> Result<()> {
        self.unsubscribe_from_stream(stream_id).await?;
        client.forget_channel(channel).await?;
        Ok(())
    }

    /// This session's subscription on `stream_id`, if the provider still
    /// delivers it
    fn live_subscription(&self, stream_id: StreamId) -> Result<Option<SubscriptionHandle>> {
        let Some(handle) = self.subscribed.get(&stream_id).map(|entry| *entry) else {
            return Ok(None);
        };
        let live = self
            .cluster
            .streams()
            .subscription_handles(stream_id)?
            .contains(&handle);
        if !live {
            self.subscribed.remove(&stream_id);
        }
        Ok(live.then_some(handle))
    }

    /// Subscriptions on `stream_id` recorded under this session's identity
    async fn owned_handles(&self, stream_id: StreamId) -> Result<Vec<SubscriptionHandle>> {
        let owned = self
            .cluster
            .subscriptions()?
            .get_handle_ids(&self.identity)
            .await?;
        Ok(self
            .cluster
            .streams()
            .subscription_handles(stream_id)?
            .into_iter()
            .filter(|handle| owned.contains(&handle.handle_id()))
            .collect())
    }

    async fn unsubscribe_from_stream(&self, stream_id: StreamId) -> Result<usize> {
        let registry = self.cluster.subscriptions()?;
        let mut cancelled = 0;
        for handle in self.owned_handles(stream_id).await? {
            if self.cluster.streams().unsubscribe(&handle)? {
                cancelled += 1;
            }
            registry
                .remove_subscription(&self.identity, handle.handle_id())
                .await?;
        }
        self.subscribed.remove(&stream_id);
        debug!(
            identity = %self.identity,
            stream_id = %stream_id,
            cancelled,
            "Unsubscribed from stream"
        );
        Ok(cancelled)
    }

    /// Leave every joined channel and drop this identity's subscriptions
    pub async fn disconnect(self) -> Result<()> {
        self.sessions.remove(&self.id);
        let result = self.leave_everything().await;
        info!(
            session_id = %self.id,
            identity = %self.identity,
            remaining_sessions = self.sessions.len(),
            "Session disconnected"
        );
        result
    }

    async fn leave_everything(&self) -> Result<()> {
        let client = self.cluster.client(&self.identity)?;
        let report = client.leave_all_channels_report().await?;
        self.release_left_channels(&client, report).await
    }

    /// Tear down every channel in `report.left`, even when the leave
    /// sequence stopped early, then surface the first failure
    async fn release_left_channels(
        &self,
        client: &ActorRef<ClientActor>,
        report: LeaveAllReport,
    ) -> Result<()> {
        let mut first_error = None;
        for (channel, stream_id) in &report.left {
            if let Err(e) = self.release_channel(client, channel, *stream_id).await {
                warn!(
                    identity = %self.identity,
                    channel = %channel,
                    error = %e,
                    "Could not release channel"
                );
                first_error.get_or_insert(e);
            }
        }

        if let Some(fault) = report.fault {
            warn!(
                identity = %self.identity,
                released = report.left.len(),
                error = %fault,
                "Leave-all stopped early"
            );
            return Err(fault.into());
        }
        first_error.map_or(Ok(()), Err)
    }

    fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event).is_err() {
            debug!(session_id = %self.id, "Session outbound queue closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_config::ChatConfig;
    use chat_grains::ChannelActor;
    use std::time::Duration;
    use tokio::task::JoinSet;
    use virtual_actors::ActorError;

    fn hub(max_connections: usize) -> ChatHub {
        let cluster = ChatCluster::new(&ChatConfig::default()).unwrap();
        ChatHub::new(cluster, 1000, max_connections)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("session closed")
    }

    /// Next relayed chat line, skipping presence notices
    async fn next_chat_line(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> String {
        loop {
            if let ServerEvent::Message { message, .. } = next_event(events).await {
                if !message.is_system() {
                    return message.text().to_string();
                }
            }
        }
    }

    async fn join(session: &Session, channel: &str) {
        session
            .handle(ClientRequest::JoinChannel { channel: channel.to_string() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = hub(1);
        let (first, _events) = hub.connect("token-a").unwrap();
        assert!(matches!(
            hub.connect("token-b"),
            Err(GatewayError::ConnectionLimit { max: 1 })
        ));

        first.disconnect().await.unwrap();
        assert_eq!(hub.session_count(), 0);
        assert!(hub.connect("token-b").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_respect_limit() {
        let hub = Arc::new(hub(4));
        let mut attempts = JoinSet::new();
        for i in 0..32 {
            let hub = Arc::clone(&hub);
            attempts.spawn(async move {
                hub.connect(&format!("token-{}", i)).map(|(session, _events)| session)
            });
        }

        let mut admitted = Vec::new();
        while let Some(attempt) = attempts.join_next().await {
            if let Ok(session) = attempt.unwrap() {
                admitted.push(session);
            }
        }
        assert_eq!(admitted.len(), 4);
        assert_eq!(hub.session_count(), 4);

        drop(admitted);
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_join_relays_channel_messages() {
        let hub = hub(10);
        let (session, mut events) = hub.connect("token-a").unwrap();

        session
            .handle(ClientRequest::SetUsername { name: "alice".to_string() })
            .await
            .unwrap();
        session
            .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
            .await
            .unwrap();
        session
            .handle(ClientRequest::SendMessage {
                channel: "general".to_string(),
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        match next_event(&mut events).await {
            ServerEvent::Message { channel, message } => {
                assert_eq!(channel, "general");
                assert_eq!(message.author(), "alice");
                assert_eq!(message.text(), "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_join_subscribes_once() {
        let hub = hub(10);
        let (session, _events) = hub.connect("token-a").unwrap();

        for _ in 0..3 {
            session
                .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
                .await
                .unwrap();
        }
        assert_eq!(hub.cluster().streams().subscription_count(), 1);
        let registry = hub.cluster().subscriptions().unwrap();
        assert_eq!(registry.get_handle_ids("token-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_sharing_identity_each_receive_messages() {
        let hub = hub(10);
        let (first, mut first_events) = hub.connect("token-a").unwrap();
        let (second, mut second_events) = hub.connect("token-a").unwrap();
        join(&first, "general").await;
        join(&second, "general").await;

        first
            .handle(ClientRequest::SendMessage {
                channel: "general".to_string(),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(next_chat_line(&mut first_events).await, "hi");
        assert_eq!(next_chat_line(&mut second_events).await, "hi");
        assert_eq!(hub.cluster().streams().subscription_count(), 2);
        let registry = hub.cluster().subscriptions().unwrap();
        assert_eq!(registry.get_handle_ids("token-a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_deactivation_releases_handles() {
        let hub = hub(10);
        let (session, mut events) = hub.connect("token-a").unwrap();
        join(&session, "general").await;

        let cluster = hub.cluster();
        let registry = cluster.subscriptions().unwrap();
        assert_eq!(registry.get_handle_ids("token-a").await.unwrap().len(), 1);

        assert!(cluster
            .system()
            .deactivate::<ChannelActor>(&"general".to_string())
            .unwrap());
        let mut released = false;
        for _ in 0..200 {
            if registry.get_handle_ids("token-a").await.unwrap().is_empty() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released);
        assert_eq!(cluster.streams().subscription_count(), 0);

        join(&session, "general").await;
        assert_eq!(cluster.streams().subscription_count(), 1);
        assert_eq!(registry.get_handle_ids("token-a").await.unwrap().len(), 1);
        session
            .handle(ClientRequest::SendMessage {
                channel: "general".to_string(),
                text: "back".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(next_chat_line(&mut events).await, "back");
    }

    #[tokio::test]
    async fn test_queries_emit_events() {
        let hub = hub(10);
        let (session, mut events) = hub.connect("token-a").unwrap();
        session
            .handle(ClientRequest::SetUsername { name: "alice".to_string() })
            .await
            .unwrap();
        session
            .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
            .await
            .unwrap();
        session
            .handle(ClientRequest::SendMessage {
                channel: "general".to_string(),
                text: "hello".to_string(),
            })
            .await
            .unwrap();
        next_event(&mut events).await;

        session.handle(ClientRequest::GetChannels).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::Channels { channels: vec!["general".to_string()] }
        );

        session
            .handle(ClientRequest::GetChannelMembers { channel: "general".to_string() })
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::Members {
                channel: "general".to_string(),
                members: vec!["alice".to_string()]
            }
        );

        session
            .handle(ClientRequest::GetChannelHistory { channel: "general".to_string() })
            .await
            .unwrap();
        match next_event(&mut events).await {
            ServerEvent::History { channel, messages } => {
                assert_eq!(channel, "general");
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].text(), "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_channel_cleans_up() {
        let hub = hub(10);
        let (session, _events) = hub.connect("token-a").unwrap();
        session
            .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
            .await
            .unwrap();
        session
            .handle(ClientRequest::LeftChannel { channel: "general".to_string() })
            .await
            .unwrap();

        let cluster = hub.cluster();
        assert_eq!(cluster.streams().subscription_count(), 0);
        let registry = cluster.subscriptions().unwrap();
        assert!(registry.get_handle_ids("token-a").await.unwrap().is_empty());
        assert!(cluster.client("token-a").unwrap().get_channels().await.unwrap().is_empty());
        assert!(cluster.channel("general").unwrap().get_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_frame_reports_error_and_keeps_session() {
        let hub = hub(10);
        let (session, mut events) = hub.connect("token-a").unwrap();

        session.handle_frame("not json").await;
        match next_event(&mut events).await {
            ServerEvent::Error { request, .. } => assert_eq!(request, None),
            other => panic!("unexpected event: {:?}", other),
        }

        session.handle_frame(r#"{"type":"get_channels"}"#).await;
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::Channels { channels: vec![] }
        );
    }

    #[tokio::test]
    async fn test_failed_request_reports_request_kind() {
        let hub = hub(10);
        let (session, mut events) = hub.connect("token-a").unwrap();
        session
            .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
            .await
            .unwrap();

        hub.cluster().streams().shutdown();
        session
            .handle_frame(r#"{"type":"send_message","channel":"general","text":"hi"}"#)
            .await;

        loop {
            if let ServerEvent::Error { request, message } = next_event(&mut events).await {
                assert_eq!(request.as_deref(), Some("send_message"));
                assert!(message.contains("closed"));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_disconnect_leaves_and_unsubscribes() {
        let hub = hub(10);
        let (session, _events) = hub.connect("token-a").unwrap();
        session
            .handle(ClientRequest::SetUsername { name: "alice".to_string() })
            .await
            .unwrap();
        for channel in ["general", "random"] {
            session
                .handle(ClientRequest::JoinChannel { channel: channel.to_string() })
                .await
                .unwrap();
        }

        let (observer, _observer_events) = hub.connect("token-b").unwrap();
        observer
            .handle(ClientRequest::JoinChannel { channel: "general".to_string() })
            .await
            .unwrap();

        session.disconnect().await.unwrap();

        let cluster = hub.cluster();
        assert_eq!(cluster.streams().subscription_count(), 1);
        let registry = cluster.subscriptions().unwrap();
        assert!(registry.get_handle_ids("token-a").await.unwrap().is_empty());
        assert_eq!(registry.get_handle_ids("token-b").await.unwrap().len(), 1);
        assert!(cluster.client("token-a").unwrap().get_channels().await.unwrap().is_empty());
        assert_eq!(
            cluster.channel("general").unwrap().get_members().await.unwrap(),
            vec!["anonymous".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stopped_leave_all_still_releases_channels_left() {
        let hub = hub(10);
        let (session, _events) = hub.connect("token-a").unwrap();
        join(&session, "general").await;
        join(&session, "random").await;

        let cluster = hub.cluster();
        let client = cluster.client("token-a").unwrap();
        let general = client.leave_channel("general").await.unwrap();
        let report = LeaveAllReport {
            left: vec![("general".to_string(), general)],
            fault: Some(ActorError::handler("random unreachable")),
        };

        let err = session
            .release_left_channels(&client, report)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Actor(ActorError::Handler { .. })));

        assert!(cluster.streams().subscription_handles(general).unwrap().is_empty());
        assert_eq!(cluster.streams().subscription_count(), 1);
        let registry = cluster.subscriptions().unwrap();
        assert_eq!(registry.get_handle_ids("token-a").await.unwrap().len(), 1);
        assert_eq!(client.get_channels().await.unwrap(), vec!["random".to_string()]);
    }
}
