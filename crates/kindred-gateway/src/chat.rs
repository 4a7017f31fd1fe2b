use chrono::Utc;
use tracing::{debug, error, info};

use kindred_db::NewMessage;
use kindred_types::events::{ChatMessagePayload, MessageAck, ServerEvent};
use kindred_types::models::DeliveryStatus;

use crate::hub::Hub;

pub const MAX_TEXT_CHARS: usize = 500;

/// A chat message as submitted by a client.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub recipient_id: i64,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub reply_to_message_id: Option<i64>,
}

/// Rejections are sent back to the client verbatim, so `Internal` keeps a
/// generic message; the cause is logged where it happens.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid recipient")]
    InvalidRecipient,
    #[error("cannot send a message to yourself")]
    SelfMessage,
    #[error("message must contain text or media")]
    MissingContent,
    #[error("message cannot contain both text and media")]
    AmbiguousContent,
    #[error("message text exceeds {MAX_TEXT_CHARS} characters")]
    TextTooLong,
    #[error("media messages need a media type")]
    MissingMediaType,
    #[error("reply target is not part of this conversation")]
    InvalidReply,
    #[error("matched users only")]
    NotMatched,
    #[error("failed to send message")]
    Internal(#[from] anyhow::Error),
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Shape checks that need no store access.
fn validate(sender_id: i64, msg: &OutgoingMessage) -> Result<(), ChatError> {
    if msg.recipient_id <= 0 {
        return Err(ChatError::InvalidRecipient);
    }
    if msg.recipient_id == sender_id {
        return Err(ChatError::SelfMessage);
    }

    let has_text = non_empty(&msg.text);
    let has_media = non_empty(&msg.media_url);
    match (has_text, has_media) {
        (true, true) => return Err(ChatError::AmbiguousContent),
        (false, false) => return Err(ChatError::MissingContent),
        _ => {}
    }

    if has_text {
        let len = msg.text.as_deref().map_or(0, |t| t.chars().count());
        if len > MAX_TEXT_CHARS {
            return Err(ChatError::TextTooLong);
        }
    } else if !non_empty(&msg.media_type) {
        return Err(ChatError::MissingMediaType);
    }

    Ok(())
}

/// Validate, persist and deliver one chat message.
///
/// The row is stored whether or not the recipient is connected; the sender
/// gets a `message_ack` saying which it was.
pub async fn send_chat_message(
    hub: &Hub,
    sender_id: i64,
    msg: OutgoingMessage,
) -> Result<ChatMessagePayload, ChatError> {
    validate(sender_id, &msg)?;
    let recipient_id = msg.recipient_id;
    let db = hub.db().clone();

    if let Some(reply_id) = msg.reply_to_message_id {
        let pair = db
            .call(move |db| db.message_participants(reply_id))
            .await
            .inspect_err(|e| error!("reply lookup for message {} failed: {:#}", reply_id, e))?;

        let same_pair = matches!(
            pair,
            Some((s, r)) if (s == sender_id && r == recipient_id) || (s == recipient_id && r == sender_id)
        );
        if !same_pair {
            return Err(ChatError::InvalidReply);
        }
    }

    let matched = db
        .call(move |db| db.is_match(sender_id, recipient_id))
        .await
        .inspect_err(|e| error!("match check {} -> {} failed: {:#}", sender_id, recipient_id, e))?;
    if !matched {
        debug!("user {} tried to message unmatched user {}", sender_id, recipient_id);
        return Err(ChatError::NotMatched);
    }

    // Only the populated body is stored.
    let (text, media_url, media_type) = if non_empty(&msg.text) {
        (msg.text, None, None)
    } else {
        (None, msg.media_url, msg.media_type)
    };

    let sent_at = Utc::now();
    let row = (text.clone(), media_url.clone(), media_type.clone());
    let reply_to_message_id = msg.reply_to_message_id;
    let id = db
        .call(move |db| {
            db.insert_message(&NewMessage {
                sender_id,
                recipient_id,
                text: row.0.as_deref(),
                media_url: row.1.as_deref(),
                media_type: row.2.as_deref(),
                reply_to_message_id,
                sent_at,
            })
        })
        .await
        .inspect_err(|e| error!("storing message {} -> {} failed: {:#}", sender_id, recipient_id, e))?;

    let payload = ChatMessagePayload {
        id,
        sender_id,
        recipient_id,
        text,
        media_url,
        media_type,
        reply_to_message_id,
        sent_at,
        is_read: false,
    };

    let delivered = hub
        .send_to_user(recipient_id, ServerEvent::ChatMessage(payload.clone()))
        .await;
    hub.send_to_user(
        sender_id,
        ServerEvent::MessageAck(MessageAck {
            message_id: id,
            recipient_id,
            status: DeliveryStatus::from_delivered(delivered),
            sent_at,
        }),
    )
    .await;

    info!(
        "message {} from {} to {} stored (delivered={})",
        id, sender_id, recipient_id, delivered
    );
    Ok(payload)
}

/// Relay a typing indicator to a matched recipient. Unmatched or invalid
/// targets are dropped silently. Returns whether anything was delivered.
pub async fn relay_typing(hub: &Hub, user_id: i64, recipient_id: i64) -> anyhow::Result<bool> {
    if recipient_id <= 0 || recipient_id == user_id || !hub.is_online(recipient_id) {
        return Ok(false);
    }

    let matched = hub.db().call(move |db| db.is_match(user_id, recipient_id)).await?;
    if !matched {
        return Ok(false);
    }
    Ok(hub.send_to_user(recipient_id, ServerEvent::Typing { user_id }).await)
}

/// Mark everything `sender_id` sent to `reader_id` as read and tell the
/// sender. Returns how many messages changed.
pub async fn mark_read(hub: &Hub, reader_id: i64, sender_id: i64) -> anyhow::Result<usize> {
    let count = hub
        .db()
        .call(move |db| db.mark_read_from(sender_id, reader_id))
        .await?;

    if count > 0 {
        hub.send_to_user(sender_id, ServerEvent::MessagesRead { reader_id, count })
            .await;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kindred_db::models::NewUser;
    use kindred_db::{Database, NewLike};
    use kindred_types::models::{ContentType, InteractionKind};

    use crate::hub::Connection;

    fn setup(users: &[i64]) -> Hub {
        let db = Database::open_in_memory().unwrap();
        for &id in users {
            db.create_user(&NewUser {
                id,
                name: format!("user{}", id),
                ..Default::default()
            })
            .unwrap();
        }
        Hub::new(Arc::new(db))
    }

    fn like(hub: &Hub, liker: i64, liked: i64) {
        hub.db()
            .insert_like(&NewLike {
                liker_user_id: liker,
                liked_user_id: liked,
                content_type: ContentType::Media,
                content_identifier: "0",
                kind: InteractionKind::Standard,
                comment: None,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn text(to: i64, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            recipient_id: to,
            text: Some(body.into()),
            ..Default::default()
        }
    }

    #[test]
    fn shape_validation() {
        assert!(matches!(validate(1, &text(0, "hi")), Err(ChatError::InvalidRecipient)));
        assert!(matches!(validate(1, &text(1, "hi")), Err(ChatError::SelfMessage)));
        assert!(matches!(validate(1, &text(2, "   ")), Err(ChatError::MissingContent)));
        assert!(matches!(
            validate(1, &text(2, &"x".repeat(MAX_TEXT_CHARS + 1))),
            Err(ChatError::TextTooLong)
        ));
        assert!(validate(1, &text(2, &"é".repeat(MAX_TEXT_CHARS))).is_ok());

        let mut both = text(2, "hi");
        both.media_url = Some("https://cdn.example/x.jpg".into());
        both.media_type = Some("image".into());
        assert!(matches!(validate(1, &both), Err(ChatError::AmbiguousContent)));

        let media_no_type = OutgoingMessage {
            recipient_id: 2,
            media_url: Some("https://cdn.example/x.jpg".into()),
            ..Default::default()
        };
        assert!(matches!(validate(1, &media_no_type), Err(ChatError::MissingMediaType)));
    }

    #[tokio::test]
    async fn unmatched_users_cannot_chat() {
        let hub = setup(&[5, 7]);
        like(&hub, 5, 7);

        let err = send_chat_message(&hub, 5, text(7, "hello")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotMatched));
        assert_eq!(err.to_string(), "matched users only");
        assert_eq!(hub.db().count_messages_between(5, 7).unwrap(), 0);
    }

    #[tokio::test]
    async fn matched_message_is_stored_delivered_and_acked() {
        let hub = setup(&[5, 7]);
        like(&hub, 5, 7);
        like(&hub, 7, 5);

        let (sender, mut rx_sender) = Connection::new(5);
        let (recipient, mut rx_recipient) = Connection::new(7);
        hub.register(sender);
        hub.register(recipient);

        let payload = send_chat_message(&hub, 5, text(7, "hello")).await.unwrap();
        assert_eq!(hub.db().count_messages_between(5, 7).unwrap(), 1);

        let mut got_message = false;
        while let Ok(event) = rx_recipient.try_recv() {
            if let ServerEvent::ChatMessage(m) = event {
                assert_eq!(m.id, payload.id);
                got_message = true;
            }
        }
        assert!(got_message);

        let mut ack = None;
        while let Ok(event) = rx_sender.try_recv() {
            if let ServerEvent::MessageAck(a) = event {
                ack = Some(a);
            }
        }
        assert_eq!(ack.map(|a| a.status), Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_the_row() {
        let hub = setup(&[5, 7]);
        like(&hub, 5, 7);
        like(&hub, 7, 5);
        let (sender, mut rx_sender) = Connection::new(5);
        hub.register(sender);

        send_chat_message(&hub, 5, text(7, "are you there?")).await.unwrap();
        assert_eq!(hub.db().count_messages_between(5, 7).unwrap(), 1);

        let mut status = None;
        while let Ok(event) = rx_sender.try_recv() {
            if let ServerEvent::MessageAck(a) = event {
                status = Some(a.status);
            }
        }
        assert_eq!(status, Some(DeliveryStatus::RecipientOffline));
    }

    #[tokio::test]
    async fn reply_must_stay_in_the_conversation() {
        let hub = setup(&[5, 7, 9]);
        for (a, b) in [(5, 7), (7, 5), (5, 9), (9, 5)] {
            like(&hub, a, b);
        }

        let other = send_chat_message(&hub, 9, text(5, "other chat")).await.unwrap();
        let mine = send_chat_message(&hub, 7, text(5, "ours")).await.unwrap();

        let mut bad = text(7, "re");
        bad.reply_to_message_id = Some(other.id);
        assert!(matches!(
            send_chat_message(&hub, 5, bad).await,
            Err(ChatError::InvalidReply)
        ));

        let mut good = text(7, "re");
        good.reply_to_message_id = Some(mine.id);
        let reply = send_chat_message(&hub, 5, good).await.unwrap();
        assert_eq!(reply.reply_to_message_id, Some(mine.id));

        let mut missing = text(7, "re");
        missing.reply_to_message_id = Some(9999);
        assert!(matches!(
            send_chat_message(&hub, 5, missing).await,
            Err(ChatError::InvalidReply)
        ));
    }

    #[tokio::test]
    async fn mark_read_notifies_the_sender() {
        let hub = setup(&[5, 7]);
        like(&hub, 5, 7);
        like(&hub, 7, 5);
        send_chat_message(&hub, 5, text(7, "one")).await.unwrap();
        send_chat_message(&hub, 5, text(7, "two")).await.unwrap();

        let (sender, mut rx_sender) = Connection::new(5);
        hub.register(sender);

        assert_eq!(mark_read(&hub, 7, 5).await.unwrap(), 2);
        let mut receipt = None;
        while let Ok(event) = rx_sender.try_recv() {
            if let ServerEvent::MessagesRead { reader_id, count } = event {
                receipt = Some((reader_id, count));
            }
        }
        assert_eq!(receipt, Some((7, 2)));
        assert_eq!(mark_read(&hub, 7, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn typing_only_reaches_matches() {
        let hub = setup(&[5, 7, 9]);
        like(&hub, 5, 7);
        like(&hub, 7, 5);
        let (r7, _rx7) = Connection::new(7);
        let (r9, _rx9) = Connection::new(9);
        hub.register(r7);
        hub.register(r9);

        assert!(relay_typing(&hub, 5, 7).await.unwrap());
        assert!(!relay_typing(&hub, 5, 9).await.unwrap());
        assert!(!relay_typing(&hub, 5, 5).await.unwrap());
    }
}
