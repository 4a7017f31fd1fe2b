use tracing::{error, info};

use kindred_types::api::ReactionOutcome;
use kindred_types::events::{ReactionPayload, ServerEvent};

use crate::hub::Hub;
use crate::notify;

pub const MAX_EMOJI_CHARS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ReactionError {
    #[error("emoji must be 1 to {MAX_EMOJI_CHARS} characters")]
    InvalidEmoji,
    #[error("message not found")]
    MessageNotFound,
    #[error("only conversation participants can react")]
    NotParticipant,
    #[error("failed to update reaction")]
    Internal(#[from] anyhow::Error),
}

/// Toggle `reactor_id`'s reaction on a message.
///
/// A user holds at most one reaction per message: sending the same emoji
/// again removes it, a different emoji replaces it. Both participants of
/// the conversation are told about the new state.
pub async fn toggle_reaction(
    hub: &Hub,
    reactor_id: i64,
    message_id: i64,
    emoji: &str,
) -> Result<ReactionOutcome, ReactionError> {
    let len = emoji.chars().count();
    if len == 0 || len > MAX_EMOJI_CHARS || emoji.trim().is_empty() {
        return Err(ReactionError::InvalidEmoji);
    }

    let db = hub.db().clone();
    let (sender_id, recipient_id) = db
        .call(move |db| db.message_participants(message_id))
        .await
        .inspect_err(|e| error!("reaction lookup for message {} failed: {:#}", message_id, e))?
        .ok_or(ReactionError::MessageNotFound)?;

    if reactor_id != sender_id && reactor_id != recipient_id {
        return Err(ReactionError::NotParticipant);
    }

    let new_emoji = emoji.to_string();
    let outcome = db
        .call(move |db| {
            let existing = db.get_reaction(message_id, reactor_id)?;
            match existing {
                None => {
                    db.upsert_reaction(message_id, reactor_id, &new_emoji)?;
                    Ok(ReactionOutcome::Added)
                }
                Some(current) if current == new_emoji => {
                    db.delete_reaction(message_id, reactor_id)?;
                    Ok(ReactionOutcome::Removed)
                }
                Some(_) => {
                    db.upsert_reaction(message_id, reactor_id, &new_emoji)?;
                    Ok(ReactionOutcome::Updated)
                }
            }
        })
        .await
        .inspect_err(|e| {
            error!(
                "reaction by {} on message {} failed: {:#}",
                reactor_id, message_id, e
            )
        })?;

    let removed = outcome == ReactionOutcome::Removed;
    let event = ServerEvent::Reaction(ReactionPayload {
        message_id,
        emoji: (!removed).then(|| emoji.to_string()),
        reactor_id,
        removed,
    });
    let delivered = notify::fan_out(hub, &[sender_id, recipient_id], event).await;

    info!(
        "reaction {:?} by {} on message {} ({} delivered)",
        outcome, reactor_id, message_id, delivered
    );
    Ok(outcome)
}
