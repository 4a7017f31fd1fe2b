use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use kindred_types::models::DisplayInfo;

use crate::models::{NewUser, UserRow};
use crate::{Database, OptionalExt, format_ts, parse_ts};

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser) -> Result<()> {
        let media = serde_json::to_string(&user.media_urls)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, gender, media_urls, audio_prompt_question, audio_prompt_answer)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.gender,
                    media,
                    user.audio_prompt_question,
                    user.audio_prompt_answer
                ],
            )?;
            Ok(())
        })
    }

    pub fn add_prompt(&self, user_id: i64, category: &str, question: &str, answer: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_prompts (user_id, category, question, answer) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, category, question) DO UPDATE SET answer = excluded.answer",
                rusqlite::params![user_id, category, question, answer],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn user_exists(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [id], |row| row.get(0))?;
            Ok(n > 0)
        })
    }

    /// True when `user_id` saved a prompt in `category` whose question is `question`.
    pub fn has_prompt(&self, user_id: i64, category: &str, question: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM user_prompts WHERE user_id = ?1 AND category = ?2 AND question = ?3",
                rusqlite::params![user_id, category, question],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    // -- Presence --

    /// Set the online flag to whatever `is_connected` reports, evaluated
    /// while the store lock is held. Writers that consult live connection
    /// state this way are totally ordered, so the last one always wins with
    /// current information. Going offline also stamps `last_seen`.
    pub fn sync_online(&self, user_id: i64, is_connected: impl FnOnce() -> bool) -> Result<bool> {
        self.with_conn(|conn| {
            let online = is_connected();
            if online {
                conn.execute("UPDATE users SET is_online = 1 WHERE id = ?1", [user_id])?;
            } else {
                conn.execute(
                    "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
                    rusqlite::params![user_id, format_ts(Utc::now())],
                )?;
            }
            Ok(online)
        })
    }

    pub fn display_info(&self, user_id: i64) -> Result<Option<DisplayInfo>> {
        let Some(user) = self.get_user_by_id(user_id)? else {
            return Ok(None);
        };

        let last_seen = match user.last_seen.as_deref() {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        };

        Ok(Some(DisplayInfo {
            user_id: user.id,
            name: user.name,
            first_photo_url: user.media_urls.into_iter().next(),
            is_online: user.is_online,
            last_seen,
        }))
    }

    // -- Consumables --

    /// Current quantity; a missing row counts as zero.
    pub fn consumable_balance(&self, user_id: i64, kind: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let qty: Option<i64> = conn
                .query_row(
                    "SELECT quantity FROM user_consumables WHERE user_id = ?1 AND consumable_type = ?2",
                    rusqlite::params![user_id, kind],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(qty.unwrap_or(0))
        })
    }

    /// Atomically add `delta` (must be positive) and return the new quantity.
    pub fn add_consumables(&self, user_id: i64, kind: &str, delta: i64) -> Result<i64> {
        anyhow::ensure!(delta > 0, "consumable delta must be positive, got {}", delta);
        self.with_conn(|conn| {
            let qty = conn.query_row(
                "INSERT INTO user_consumables (user_id, consumable_type, quantity) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, consumable_type)
                 DO UPDATE SET quantity = quantity + excluded.quantity, updated_at = datetime('now')
                 RETURNING quantity",
                rusqlite::params![user_id, kind, delta],
                |row| row.get(0),
            )?;
            Ok(qty)
        })
    }

    // -- Subscriptions --

    pub fn add_subscription(&self, user_id: i64, feature: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_subscriptions (user_id, feature_type, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, feature, format_ts(expires_at)],
            )?;
            Ok(())
        })
    }

    /// Latest expiry of a subscription for `feature` still active at `now`.
    pub fn active_subscription(
        &self,
        user_id: i64,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(expires_at) FROM user_subscriptions
                 WHERE user_id = ?1 AND feature_type = ?2 AND expires_at > ?3",
                rusqlite::params![user_id, feature, format_ts(now)],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })?;

        raw.as_deref().map(parse_ts).transpose()
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, gender, media_urls, audio_prompt_question, audio_prompt_answer, is_online, last_seen
         FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok((
                UserRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    gender: row.get(2)?,
                    media_urls: Vec::new(),
                    audio_prompt_question: row.get(4)?,
                    audio_prompt_answer: row.get(5)?,
                    is_online: row.get(6)?,
                    last_seen: row.get(7)?,
                },
                row.get::<_, String>(3)?,
            ))
        })
        .optional()?;

    let Some((mut user, media_json)) = row else {
        return Ok(None);
    };

    user.media_urls = serde_json::from_str(&media_json).unwrap_or_else(|e| {
        tracing::warn!("Corrupt media_urls on user {}: {}", user.id, e);
        Vec::new()
    });

    Ok(Some(user))
}
