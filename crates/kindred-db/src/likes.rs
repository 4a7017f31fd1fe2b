use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use kindred_types::models::{ContentType, InteractionKind, ROSE_CONSUMABLE};

use crate::{Database, format_ts, is_unique_violation};

/// A like about to be written.
#[derive(Debug, Clone)]
pub struct NewLike<'a> {
    pub liker_user_id: i64,
    pub liked_user_id: i64,
    pub content_type: ContentType,
    pub content_identifier: &'a str,
    pub kind: InteractionKind,
    pub comment: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeInsert {
    Inserted(i64),
    /// Same (liker, target, content type, identifier) already stored.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoseCommit {
    Committed(i64),
    /// The guarded decrement touched no row.
    InsufficientBalance,
    AlreadyLiked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardCommit {
    Committed(i64),
    LimitReached,
    AlreadyLiked,
}

/// Rolling cap on standard likes: at most `limit` since `since`.
#[derive(Debug, Clone, Copy)]
pub struct LikeCap {
    pub since: DateTime<Utc>,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnmatchSummary {
    pub likes_removed: usize,
    pub messages_marked_read: usize,
}

impl Database {
    pub fn insert_like(&self, like: &NewLike<'_>) -> Result<LikeInsert> {
        self.with_conn(|conn| match insert_like_row(conn, like) {
            Ok(id) => Ok(LikeInsert::Inserted(id)),
            Err(e) if is_unique_violation(&e) => Ok(LikeInsert::AlreadyExists),
            Err(e) => Err(e.into()),
        })
    }

    /// Spend one rose and store the like in a single transaction.
    ///
    /// The `quantity > 0` guard on the UPDATE is what actually protects the
    /// balance; any earlier read is only a fast path. A duplicate like rolls
    /// the decrement back.
    pub fn commit_rose_like(&self, like: &NewLike<'_>) -> Result<RoseCommit> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let spent = tx.execute(
                "UPDATE user_consumables
                 SET quantity = quantity - 1, updated_at = datetime('now')
                 WHERE user_id = ?1 AND consumable_type = ?2 AND quantity > 0",
                rusqlite::params![like.liker_user_id, ROSE_CONSUMABLE],
            )?;
            if spent == 0 {
                return Ok(RoseCommit::InsufficientBalance);
            }

            match insert_like_row(&tx, like) {
                Ok(id) => {
                    tx.commit()?;
                    Ok(RoseCommit::Committed(id))
                }
                // Dropping `tx` rolls the decrement back.
                Err(e) if is_unique_violation(&e) => Ok(RoseCommit::AlreadyLiked),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Count the window and store a standard like in one transaction, so
    /// concurrent likes from the same user cannot overshoot the cap.
    /// `cap` is `None` for users exempt from the limit.
    pub fn commit_standard_like(&self, like: &NewLike<'_>, cap: Option<LikeCap>) -> Result<StandardCommit> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(cap) = cap {
                let sent = query_standard_likes_since(&tx, like.liker_user_id, cap.since)?;
                if sent >= cap.limit {
                    return Ok(StandardCommit::LimitReached);
                }
            }

            match insert_like_row(&tx, like) {
                Ok(id) => {
                    tx.commit()?;
                    Ok(StandardCommit::Committed(id))
                }
                Err(e) if is_unique_violation(&e) => Ok(StandardCommit::AlreadyLiked),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// True when `liker` has liked `liked` on any content.
    pub fn like_exists(&self, liker: i64, liked: i64) -> Result<bool> {
        self.with_conn(|conn| query_like_exists(conn, liker, liked))
    }

    /// Both directions liked, on any content.
    pub fn is_match(&self, a: i64, b: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(query_like_exists(conn, a, b)? && query_like_exists(conn, b, a)?))
    }

    pub fn matched_peer_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT l1.liked_user_id
                 FROM likes l1
                 JOIN likes l2
                   ON l2.liker_user_id = l1.liked_user_id
                  AND l2.liked_user_id = l1.liker_user_id
                 WHERE l1.liker_user_id = ?1
                 ORDER BY l1.liked_user_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Standard likes sent by `liker` at or after `since`.
    pub fn count_standard_likes_since(&self, liker: i64, since: DateTime<Utc>) -> Result<u32> {
        self.with_conn(|conn| query_standard_likes_since(conn, liker, since))
    }

    /// Number of like rows in either direction between `a` and `b`.
    pub fn count_likes_between(&self, a: i64, b: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM likes
                 WHERE (liker_user_id = ?1 AND liked_user_id = ?2)
                    OR (liker_user_id = ?2 AND liked_user_id = ?1)",
                [a, b],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    // -- Dislikes --

    /// Record a dislike. Repeating it only refreshes the timestamp.
    pub fn insert_dislike(&self, disliker: i64, disliked: i64) -> Result<()> {
        self.with_conn(|conn| upsert_dislike(conn, disliker, disliked))
    }

    pub fn dislike_exists(&self, disliker: i64, disliked: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM dislikes WHERE disliker_user_id = ?1 AND disliked_user_id = ?2",
                [disliker, disliked],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Dissolve a match: drop likes both ways, remember the dislike, and
    /// mark the conversation read, all in one transaction.
    pub fn unmatch(&self, requester: i64, target: i64) -> Result<UnmatchSummary> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let likes_removed = tx.execute(
                "DELETE FROM likes
                 WHERE (liker_user_id = ?1 AND liked_user_id = ?2)
                    OR (liker_user_id = ?2 AND liked_user_id = ?1)",
                [requester, target],
            )?;

            upsert_dislike(&tx, requester, target)?;

            let messages_marked_read = tx.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE is_read = 0
                   AND ((sender_id = ?1 AND recipient_id = ?2)
                     OR (sender_id = ?2 AND recipient_id = ?1))",
                [requester, target],
            )?;

            tx.commit()?;
            Ok(UnmatchSummary {
                likes_removed,
                messages_marked_read,
            })
        })
    }
}

fn insert_like_row(conn: &Connection, like: &NewLike<'_>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO likes
            (liker_user_id, liked_user_id, content_type, content_identifier, interaction_type, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            like.liker_user_id,
            like.liked_user_id,
            like.content_type.as_str(),
            like.content_identifier,
            like.kind.as_str(),
            like.comment,
            format_ts(like.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_standard_likes_since(conn: &Connection, liker: i64, since: DateTime<Utc>) -> Result<u32> {
    let n: u32 = conn.query_row(
        "SELECT COUNT(*) FROM likes
         WHERE liker_user_id = ?1 AND interaction_type = 'standard' AND created_at >= ?2",
        rusqlite::params![liker, format_ts(since)],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn query_like_exists(conn: &Connection, liker: i64, liked: i64) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE liker_user_id = ?1 AND liked_user_id = ?2",
        [liker, liked],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn upsert_dislike(conn: &Connection, disliker: i64, disliked: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO dislikes (disliker_user_id, disliked_user_id) VALUES (?1, ?2)
         ON CONFLICT(disliker_user_id, disliked_user_id) DO UPDATE SET created_at = datetime('now')",
        [disliker, disliked],
    )?;
    Ok(())
}
