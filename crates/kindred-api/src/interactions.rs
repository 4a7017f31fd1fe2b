//! Likes, roses, dislikes and unmatches.
//!
//! Every check-then-act step (balance, daily cap, duplicate like) is closed
//! inside a store transaction; nothing here holds an application lock across
//! an operation. Notifications run after commit and are best-effort.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use kindred_db::models::UserRow;
use kindred_db::{CallTimedOut, LikeCap, NewLike, RoseCommit, StandardCommit, UnmatchSummary};
use kindred_gateway::notify::{self, CommittedLike};
use kindred_types::api::{LikeAllowance, LikeRequest, LikeResponse};
use kindred_types::models::{
    AUDIO_PROMPT_IDENTIFIER, ContentType, InteractionKind, PROFILE_IDENTIFIER, ROSE_CONSUMABLE,
    UNLIMITED_LIKES_FEATURE,
};

use crate::AppStateInner;
use crate::error::InteractionError;

/// Standard likes allowed per rolling window without a subscription.
pub const DAILY_LIKE_LIMIT: u32 = 15;

/// Length of the rolling like window.
pub const LIKE_WINDOW_HOURS: i64 = 24;

pub const MAX_COMMENT_CHARS: usize = 140;

/// Likers with this gender must comment on non-reciprocal content likes.
const COMMENT_REQUIRED_GENDER: &str = "man";

/// Validate and store a like, then notify the target (or both sides on a
/// match) in the background.
pub async fn process_like(
    state: &AppStateInner,
    liker_id: i64,
    req: LikeRequest,
) -> Result<LikeResponse, InteractionError> {
    let target_id = req.liked_user_id;
    if target_id == liker_id {
        return Err(InteractionError::invalid("cannot like yourself"));
    }

    let db = state.db.clone();
    let (liker, target) = db
        .call(move |db| Ok((db.get_user_by_id(liker_id)?, db.get_user_by_id(target_id)?)))
        .await?;
    let target = target.ok_or(InteractionError::UserNotFound)?;
    let liker = liker.ok_or(InteractionError::UserNotFound)?;

    let content_type: ContentType = req
        .content_type
        .parse()
        .map_err(|_| InteractionError::invalid(format!("invalid content type: {}", req.content_type)))?;

    let reciprocal = db.call(move |db| db.like_exists(target_id, liker_id)).await?;

    let identifier = validate_content(state, &target, content_type, req.content_identifier, reciprocal).await?;

    let comment = normalize_comment(req.comment)?;
    if comment.is_none()
        && content_type != ContentType::Profile
        && !reciprocal
        && liker.gender.as_deref() == Some(COMMENT_REQUIRED_GENDER)
    {
        return Err(InteractionError::CommentRequired);
    }

    let kind = req.interaction_type.unwrap_or_default();
    let liked_at = Utc::now();

    let like_id = match kind {
        InteractionKind::Rose => {
            commit_rose(state, liker_id, target_id, content_type, identifier, comment.clone(), liked_at).await?
        }
        InteractionKind::Standard => {
            commit_standard(state, liker_id, target_id, content_type, identifier, comment.clone(), liked_at)
                .await?
        }
    };

    info!(
        "user {} liked user {} ({} like {}, match={})",
        liker_id,
        target_id,
        kind.as_str(),
        like_id,
        reciprocal
    );

    notify::like_committed(
        &state.hub,
        CommittedLike {
            liker_id,
            liked_id: target_id,
            is_rose: kind == InteractionKind::Rose,
            comment,
            liked_at,
        },
    );

    Ok(LikeResponse {
        like_id,
        is_match: reciprocal,
    })
}

/// Check that the liked element exists on the target's current profile and
/// return the identifier in the form it is stored under. Media indexes are
/// canonicalised so "00" and "0" name the same like.
async fn validate_content(
    state: &AppStateInner,
    target: &UserRow,
    content_type: ContentType,
    identifier: String,
    reciprocal: bool,
) -> Result<String, InteractionError> {
    match content_type {
        ContentType::Profile => {
            if identifier != PROFILE_IDENTIFIER {
                return Err(InteractionError::invalid("invalid profile identifier"));
            }
            if !reciprocal {
                return Err(InteractionError::invalid(
                    "profile likes are only allowed in reply to a like",
                ));
            }
        }
        ContentType::Media => {
            let index: usize = identifier
                .parse()
                .map_err(|_| InteractionError::invalid("media identifier must be an index"))?;
            if index >= target.media_urls.len() {
                return Err(InteractionError::invalid("media index out of range"));
            }
            return Ok(index.to_string());
        }
        ContentType::AudioPrompt => {
            if identifier != AUDIO_PROMPT_IDENTIFIER {
                return Err(InteractionError::invalid("invalid audio prompt identifier"));
            }
            if !target.has_audio_prompt() {
                return Err(InteractionError::invalid("user has no audio prompt"));
            }
        }
        category => {
            debug_assert!(category.is_prompt_category());
            let target_id = target.id;
            let question = identifier.clone();
            let found = state
                .db
                .call(move |db| db.has_prompt(target_id, category.as_str(), &question))
                .await?;
            if !found {
                return Err(InteractionError::invalid(format!(
                    "no {} prompt matches this identifier",
                    category
                )));
            }
        }
    }
    Ok(identifier)
}

/// Trim, drop empty, and enforce the length cap.
fn normalize_comment(comment: Option<String>) -> Result<Option<String>, InteractionError> {
    let Some(comment) = comment else {
        return Ok(None);
    };
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err(InteractionError::invalid(format!(
            "comment exceeds {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(Some(trimmed.to_string()))
}

async fn commit_rose(
    state: &AppStateInner,
    liker_id: i64,
    target_id: i64,
    content_type: ContentType,
    identifier: String,
    comment: Option<String>,
    liked_at: chrono::DateTime<Utc>,
) -> Result<i64, InteractionError> {
    let db = state.db.clone();

    // Fast path only; the guarded decrement below is the real check.
    let balance = db.call(move |db| db.consumable_balance(liker_id, ROSE_CONSUMABLE)).await?;
    if balance <= 0 {
        return Err(InteractionError::InsufficientConsumables);
    }

    let outcome = db
        .call(move |db| {
            db.commit_rose_like(&NewLike {
                liker_user_id: liker_id,
                liked_user_id: target_id,
                content_type,
                content_identifier: &identifier,
                kind: InteractionKind::Rose,
                comment: comment.as_deref(),
                created_at: liked_at,
            })
        })
        .await
        .inspect_err(|e| warn_if_unknown(e, liker_id, target_id))?;

    match outcome {
        RoseCommit::Committed(id) => Ok(id),
        RoseCommit::InsufficientBalance => Err(InteractionError::InsufficientConsumables),
        RoseCommit::AlreadyLiked => Err(InteractionError::AlreadyLiked),
    }
}

async fn commit_standard(
    state: &AppStateInner,
    liker_id: i64,
    target_id: i64,
    content_type: ContentType,
    identifier: String,
    comment: Option<String>,
    liked_at: chrono::DateTime<Utc>,
) -> Result<i64, InteractionError> {
    let db = state.db.clone();
    let cap = like_cap(state, liker_id, liked_at).await?;

    let outcome = db
        .call(move |db| {
            db.commit_standard_like(
                &NewLike {
                    liker_user_id: liker_id,
                    liked_user_id: target_id,
                    content_type,
                    content_identifier: &identifier,
                    kind: InteractionKind::Standard,
                    comment: comment.as_deref(),
                    created_at: liked_at,
                },
                cap,
            )
        })
        .await
        .inspect_err(|e| warn_if_unknown(e, liker_id, target_id))?;

    match outcome {
        StandardCommit::Committed(id) => Ok(id),
        StandardCommit::LimitReached => {
            debug!("user {} hit the daily like limit", liker_id);
            Err(InteractionError::LikeLimitReached)
        }
        StandardCommit::AlreadyLiked => Err(InteractionError::AlreadyLiked),
    }
}

/// A commit that outlived the store timeout may still land. It is reported as
/// an internal error; a retry then resolves to `AlreadyLiked` if it did.
fn warn_if_unknown(e: &anyhow::Error, liker_id: i64, target_id: i64) {
    if e.is::<CallTimedOut>() {
        warn!("like {} -> {} timed out; it may still have been stored", liker_id, target_id);
    }
}

/// The rolling cap for `user_id`, or `None` with an active unlimited-likes
/// subscription.
async fn like_cap(
    state: &AppStateInner,
    user_id: i64,
    now: chrono::DateTime<Utc>,
) -> Result<Option<LikeCap>, InteractionError> {
    let unlimited = state
        .db
        .call(move |db| db.active_subscription(user_id, UNLIMITED_LIKES_FEATURE, now))
        .await?;

    Ok(unlimited.is_none().then(|| LikeCap {
        since: now - Duration::hours(LIKE_WINDOW_HOURS),
        limit: DAILY_LIKE_LIMIT,
    }))
}

/// Remaining standard likes in the current window and the rose balance.
pub async fn like_allowance(state: &AppStateInner, user_id: i64) -> Result<LikeAllowance, InteractionError> {
    let now = Utc::now();
    let cap = like_cap(state, user_id, now).await?;

    let (sent, roses) = state
        .db
        .call(move |db| {
            let sent = match cap {
                Some(cap) => Some(db.count_standard_likes_since(user_id, cap.since)?),
                None => None,
            };
            Ok((sent, db.consumable_balance(user_id, ROSE_CONSUMABLE)?))
        })
        .await?;

    Ok(LikeAllowance {
        standard_likes_remaining: sent.map(|n| DAILY_LIKE_LIMIT.saturating_sub(n)),
        roses,
    })
}

/// Dissolve a match: likes go away in both directions, a dislike keeps the
/// pair apart in the feed, unread messages are closed out. The other side
/// is told afterwards.
pub async fn process_unmatch(
    state: &AppStateInner,
    requester_id: i64,
    target_id: i64,
) -> Result<UnmatchSummary, InteractionError> {
    ensure_other_user(state, requester_id, target_id).await?;

    let summary = state
        .db
        .call(move |db| db.unmatch(requester_id, target_id))
        .await?;

    info!(
        "user {} unmatched user {} ({} likes removed, {} messages closed)",
        requester_id, target_id, summary.likes_removed, summary.messages_marked_read
    );

    notify::match_removed(&state.hub, requester_id, target_id);
    Ok(summary)
}

/// Record a dislike. If the target had a pending like on the disliker, the
/// target is told to drop it.
pub async fn process_dislike(
    state: &AppStateInner,
    disliker_id: i64,
    target_id: i64,
) -> Result<(), InteractionError> {
    ensure_other_user(state, disliker_id, target_id).await?;

    let had_liked = state
        .db
        .call(move |db| db.like_exists(target_id, disliker_id))
        .await
        .unwrap_or_else(|e| {
            warn!(
                "reverse like lookup {} -> {} failed, skipping retraction: {:#}",
                target_id, disliker_id, e
            );
            false
        });

    state
        .db
        .call(move |db| db.insert_dislike(disliker_id, target_id))
        .await?;

    debug!("user {} disliked user {} (had pending like={})", disliker_id, target_id, had_liked);

    if had_liked {
        notify::like_removed(&state.hub, disliker_id, target_id);
    }
    Ok(())
}

async fn ensure_other_user(state: &AppStateInner, user_id: i64, target_id: i64) -> Result<(), InteractionError> {
    if user_id == target_id {
        return Err(InteractionError::invalid("target must be another user"));
    }
    let exists = state.db.call(move |db| db.user_exists(target_id)).await?;
    if !exists {
        return Err(InteractionError::UserNotFound);
    }
    Ok(())
}
