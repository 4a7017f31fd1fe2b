use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryStatus, PresenceStatus};

/// Commands sent FROM client TO server over the WebSocket.
///
/// Every frame is a single JSON object; `type` selects the variant and the
/// remaining fields sit beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Send a chat message to a matched user
    ChatMessage {
        recipient_id: i64,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        reply_to_message_id: Option<i64>,
    },

    /// Toggle an emoji reaction on a message
    Reaction { message_id: i64, emoji: String },

    /// Indicate typing in the conversation with `recipient_id`
    Typing { recipient_id: i64 },

    /// Mark every unread message from `sender_id` as read
    MarkRead { sender_id: i64 },
}

impl ClientCommand {
    /// Type tags a client may send.
    pub const TYPES: [&'static str; 4] = ["chat_message", "reaction", "typing", "mark_read"];

    /// Decode one text frame, telling apart broken JSON, unknown tags and
    /// known tags with bad fields.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(DecodeError::MissingType)?;

        if !Self::TYPES.contains(&kind) {
            return Err(DecodeError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection registered
    Ready { user_id: i64 },

    /// A chat message addressed to this user
    ChatMessage(ChatMessagePayload),

    /// Sender-side acknowledgement that a message was stored
    MessageAck(MessageAck),

    /// A reaction on a message in one of this user's conversations changed
    Reaction(ReactionPayload),

    /// A matched user came online or went offline
    Presence(PresencePayload),

    /// A matched user is typing
    Typing { user_id: i64 },

    /// The recipient read this user's messages
    MessagesRead { reader_id: i64, count: usize },

    NewLikeReceived(LikerInfo),

    NewMatch(MatchInfo),

    /// A pending like was withdrawn (the liker disliked this user)
    LikeRemoved(LikeRemoval),

    /// A match was dissolved by the other side
    MatchRemoved(MatchRemoval),

    /// Local rejection of a client frame; the connection stays open
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire tag, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::ChatMessage(_) => "chat_message",
            Self::MessageAck(_) => "message_ack",
            Self::Reaction(_) => "reaction",
            Self::Presence(_) => "presence",
            Self::Typing { .. } => "typing",
            Self::MessagesRead { .. } => "messages_read",
            Self::NewLikeReceived(_) => "new_like_received",
            Self::NewMatch(_) => "new_match",
            Self::LikeRemoved(_) => "like_removed",
            Self::MatchRemoved(_) => "match_removed",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to_message_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAck {
    pub message_id: i64,
    pub recipient_id: i64,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionPayload {
    pub message_id: i64,
    /// Absent when `removed` is true.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub emoji: Option<String>,
    pub reactor_id: i64,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: i64,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Basic info about someone who liked the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikerInfo {
    pub liker_user_id: i64,
    pub name: String,
    pub first_photo_url: Option<String>,
    pub is_rose: bool,
    pub comment: Option<String>,
    pub liked_at: DateTime<Utc>,
}

/// The other side of a freshly completed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub matched_user_id: i64,
    pub name: String,
    pub first_photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Whose like completed the match. The other side can drop the pending
    /// "like received" entry for this user.
    pub initiating_liker_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRemoval {
    pub liker_user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRemoval {
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_like_received_is_flat_on_the_wire() {
        let event = ServerEvent::NewLikeReceived(LikerInfo {
            liker_user_id: 10,
            name: "Ada".into(),
            first_photo_url: None,
            is_rose: false,
            comment: None,
            liked_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_like_received");
        assert_eq!(json["liker_user_id"], 10);
    }

    #[test]
    fn decode_chat_message() {
        let cmd = ClientCommand::decode(r#"{"type":"chat_message","recipient_id":7,"text":"hi"}"#)
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::ChatMessage {
                recipient_id: 7,
                text: Some("hi".into()),
                media_url: None,
                media_type: None,
                reply_to_message_id: None,
            }
        );
    }

    #[test]
    fn decode_distinguishes_failures() {
        assert!(matches!(
            ClientCommand::decode("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            ClientCommand::decode(r#"{"recipient_id":7}"#),
            Err(DecodeError::MissingType)
        );
        assert_eq!(
            ClientCommand::decode(r#"{"type":"new_match"}"#),
            Err(DecodeError::UnknownType("new_match".into()))
        );
        assert!(matches!(
            ClientCommand::decode(r#"{"type":"reaction","message_id":"x"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }
}
