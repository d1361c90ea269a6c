//! JSON frames exchanged with WebSocket callers

use chat_types::Message;
use serde::{Deserialize, Serialize};

/// Frame sent by a caller, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    GetChannelHistory { channel: String },
    GetChannels,
    GetChannelMembers { channel: String },
    JoinChannel { channel: String },
    LeftChannel { channel: String },
    SetUsername { name: String },
    SendMessage { channel: String, text: String },
}

impl ClientRequest {
    /// Value of the `type` tag, echoed back in error events
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::GetChannelHistory { .. } => "get_channel_history",
            ClientRequest::GetChannels => "get_channels",
            ClientRequest::GetChannelMembers { .. } => "get_channel_members",
            ClientRequest::JoinChannel { .. } => "join_channel",
            ClientRequest::LeftChannel { .. } => "left_channel",
            ClientRequest::SetUsername { .. } => "set_username",
            ClientRequest::SendMessage { .. } => "send_message",
        }
    }
}

/// Frame pushed to a caller, tagged by `event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    #[serde(rename = "send.history")]
    History {
        channel: String,
        messages: Vec<Message>,
    },

    #[serde(rename = "send.channels")]
    Channels { channels: Vec<String> },

    #[serde(rename = "send.members")]
    Members {
        channel: String,
        members: Vec<String>,
    },

    #[serde(rename = "send.message")]
    Message { channel: String, message: Message },

    #[serde(rename = "error")]
    Error {
        request: Option<String>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_tags() {
        let request: ClientRequest = serde_json::from_value(json!({
            "type": "send_message",
            "channel": "general",
            "text": "hi"
        }))
        .unwrap();
        assert_eq!(
            request,
            ClientRequest::SendMessage {
                channel: "general".to_string(),
                text: "hi".to_string()
            }
        );
        assert_eq!(request.kind(), "send_message");

        let request: ClientRequest = serde_json::from_str(r#"{"type":"get_channels"}"#).unwrap();
        assert_eq!(request, ClientRequest::GetChannels);
    }

    #[test]
    fn test_unknown_request_is_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"shout"}"#).is_err());
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"join_channel"}"#).is_err());
    }

    #[test]
    fn test_event_names() {
        let event = ServerEvent::Members {
            channel: "general".to_string(),
            members: vec!["alice".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "send.members", "channel": "general", "members": ["alice"]})
        );

        let event = ServerEvent::Error {
            request: Some("join_channel".to_string()),
            message: "boom".to_string(),
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["event"], "error");
    }
}
