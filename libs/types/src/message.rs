//! Chat message value type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author recorded on notifications generated by the chat itself
pub const SYSTEM_AUTHOR: &str = "Server";

/// One chat line: who said what, and when
///
/// Serialized as `{"author", "created", "text"}` with `created` in RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    author: String,
    created: DateTime<Utc>,
    text: String,
}

impl Message {
    /// Message stamped with the current time
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_timestamp(author, text, Utc::now())
    }

    /// Notification authored by [`SYSTEM_AUTHOR`]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_AUTHOR, text)
    }

    pub fn with_timestamp(
        author: impl Into<String>,
        text: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            author: author.into(),
            created,
            text: text.into(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_system(&self) -> bool {
        self.author == SYSTEM_AUTHOR
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.created.format("%H:%M:%S"),
            self.author,
            self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_message_is_stamped_now() {
        let before = Utc::now();
        let message = Message::new("alice", "hello");
        let after = Utc::now();

        assert_eq!(message.author(), "alice");
        assert_eq!(message.text(), "hello");
        assert!(message.created() >= before && message.created() <= after);
        assert!(!message.is_system());
    }

    #[test]
    fn test_system_message_author() {
        let message = Message::system("alice has joined the channel");
        assert_eq!(message.author(), "Server");
        assert!(message.is_system());
    }

    #[test]
    fn test_json_shape() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let message = Message::with_timestamp("bob", "hi", created);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["author"], "bob");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["created"], "2024-03-01T12:30:00Z");

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_display() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let message = Message::with_timestamp("carol", "morning", created);
        assert_eq!(message.to_string(), "[09:05:07] carol: morning");
    }
}
