use anyhow::Result;
use chrono::{DateTime, Utc};
use crate::{Database, OptionalExt, format_ts};

/// A chat message about to be written. Exactly one of `text` and
/// `media_url` is set; the table CHECK enforces it as well.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub text: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub media_type: Option<&'a str>,
    pub reply_to_message_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
}

impl Database {
    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages
                    (sender_id, recipient_id, message_text, media_url, media_type, reply_to_message_id, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.sender_id,
                    msg.recipient_id,
                    msg.text,
                    msg.media_url,
                    msg.media_type,
                    msg.reply_to_message_id,
                    format_ts(msg.sent_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// (sender, recipient) of a message, if it exists.
    pub fn message_participants(&self, id: i64) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT sender_id, recipient_id FROM chat_messages WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    /// Mark everything `sender` sent to `reader` as read. Returns rows changed.
    pub fn mark_read_from(&self, sender: i64, reader: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE sender_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                [sender, reader],
            )?;
            Ok(n)
        })
    }

    pub fn count_messages_between(&self, a: i64, b: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)",
                [a, b],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    // -- Reactions --

    /// The emoji `user_id` currently has on `message_id`, if any.
    pub fn get_reaction(&self, message_id: i64, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT emoji FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                [message_id, user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Insert or replace the single reaction a user has on a message.
    pub fn upsert_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET emoji = excluded.emoji, updated_at = datetime('now')",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_reaction(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                [message_id, user_id],
            )?;
            Ok(n > 0)
        })
    }
}
