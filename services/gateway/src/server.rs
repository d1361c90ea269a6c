//! WebSocket server
//!
//! Accepts connections, authenticates nothing, and binds each connection to
//! the identity in its `access_token` query parameter. One task per
//! connection pumps frames between the socket and its [`Session`].

use crate::error::{GatewayError, Result};
use crate::hub::{ChatHub, Session};
use crate::protocol::ServerEvent;

use chat_config::ChatConfig;
use chat_grains::ChatCluster;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Query parameter carrying the caller identity
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

pub struct ChatServer {
    listener: TcpListener,
    hub: Arc<ChatHub>,
}

impl ChatServer {
    /// Bind the listener described by `config.server`
    pub async fn bind(config: &ChatConfig, cluster: ChatCluster) -> Result<Self> {
        let addr: SocketAddr = config
            .server
            .socket_addr()
            .parse()
            .map_err(|e| GatewayError::Configuration {
                message: format!("Invalid bind address: {}", e),
            })?;

        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on {}", listener.local_addr()?);

        let hub = ChatHub::new(
            cluster,
            config.chat.history_page_size,
            config.server.max_connections,
        );
        Ok(Self {
            listener,
            hub: Arc::new(hub),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<ChatHub> {
        Arc::clone(&self.hub)
    }

    /// Accept connections until `shutdown` resolves, then drop the ones
    /// still open
    pub async fn serve<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let hub = Arc::clone(&self.hub);
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(hub, stream, peer).await {
                                    warn!(peer = %peer, error = %e, "WebSocket connection error");
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    info!(open_connections = connections.len(), "WebSocket server stopping");
                    break;
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

/// Pull the caller identity out of a request URI query string
pub fn identity_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == ACCESS_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

async fn handle_connection(hub: Arc<ChatHub>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let mut identity = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        match identity_from_query(request.uri().query()) {
            Some(token) => {
                identity = Some(token);
                Ok(response)
            }
            None => {
                let mut rejection = ErrorResponse::new(Some(format!(
                    "missing {} query parameter",
                    ACCESS_TOKEN_PARAM
                )));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
        }
    })
    .await?;

    let identity = identity.ok_or(GatewayError::MissingIdentity)?;
    debug!(peer = %peer, identity = %identity, "WebSocket handshake complete");

    let (session, events) = hub.connect(&identity)?;
    run_session(ws, &session, events).await;
    session.disconnect().await
}

async fn run_session(
    ws: WebSocketStream<TcpStream>,
    session: &Session,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::Text(json)).await {
                    warn!(session_id = %session.id(), error = %e, "Failed to send event");
                    break;
                }
            }

            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => session.handle_frame(&text).await,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(session_id = %session.id(), "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %session.id(), error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_query() {
        assert_eq!(
            identity_from_query(Some("access_token=abc%20def&x=1")),
            Some("abc def".to_string())
        );
        assert_eq!(identity_from_query(Some("x=1")), None);
        assert_eq!(identity_from_query(Some("access_token=")), None);
        assert_eq!(identity_from_query(None), None);
    }
}
