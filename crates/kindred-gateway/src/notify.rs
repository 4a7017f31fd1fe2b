//! Typed push notifications for likes, matches and their reversal.
//!
//! Everything here is best-effort. Each notification runs as a detached task
//! bounded by `NOTIFY_TIMEOUT` and is never retried: the stored row is the
//! durable record, the push is a convenience.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use kindred_types::events::{LikeRemoval, LikerInfo, MatchInfo, MatchRemoval, ServerEvent};
use kindred_types::models::DisplayInfo;

use crate::hub::Hub;

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// A like that has just been committed.
#[derive(Debug, Clone)]
pub struct CommittedLike {
    pub liker_id: i64,
    pub liked_id: i64,
    pub is_rose: bool,
    pub comment: Option<String>,
    pub liked_at: DateTime<Utc>,
}

/// Push `event` to each of `user_ids`. Returns the number delivered.
pub async fn fan_out(hub: &Hub, user_ids: &[i64], event: ServerEvent) -> usize {
    let mut delivered = 0;
    for &user_id in user_ids {
        if hub.send_to_user(user_id, event.clone()).await {
            delivered += 1;
        }
    }
    delivered
}

/// After a like: tell both sides about a new match, or the target about a
/// new like.
pub fn like_committed(hub: &Hub, like: CommittedLike) -> JoinHandle<()> {
    let hub = hub.clone();
    spawn_bounded("like", async move {
        let (a, b) = (like.liker_id, like.liked_id);
        let matched = hub.db().call(move |db| db.is_match(a, b)).await?;

        if matched {
            let liker = load_display_info(&hub, a).await?;
            let liked = load_display_info(&hub, b).await?;

            let to_liker = hub
                .send_to_user(a, ServerEvent::NewMatch(match_info(&liked, a)))
                .await;
            let to_liked = hub
                .send_to_user(b, ServerEvent::NewMatch(match_info(&liker, a)))
                .await;
            debug!(
                "match {} <-> {} announced (liker delivered={}, liked delivered={})",
                a, b, to_liker, to_liked
            );
        } else {
            let liker = load_display_info(&hub, a).await?;
            let delivered = hub
                .send_to_user(
                    b,
                    ServerEvent::NewLikeReceived(LikerInfo {
                        liker_user_id: a,
                        name: liker.name,
                        first_photo_url: liker.first_photo_url,
                        is_rose: like.is_rose,
                        comment: like.comment,
                        liked_at: like.liked_at,
                    }),
                )
                .await;
            debug!("like {} -> {} pushed (delivered={})", a, b, delivered);
        }
        Ok(())
    })
}

/// Tell `target` that `requester` dissolved their match.
pub fn match_removed(hub: &Hub, requester: i64, target: i64) -> JoinHandle<()> {
    let hub = hub.clone();
    spawn_bounded("match removal", async move {
        hub.send_to_user(target, ServerEvent::MatchRemoved(MatchRemoval { user_id: requester }))
            .await;
        Ok(())
    })
}

/// Tell `target` to retract the pending like it received from `disliker`.
pub fn like_removed(hub: &Hub, disliker: i64, target: i64) -> JoinHandle<()> {
    let hub = hub.clone();
    spawn_bounded("like removal", async move {
        hub.send_to_user(
            target,
            ServerEvent::LikeRemoved(LikeRemoval {
                liker_user_id: disliker,
            }),
        )
        .await;
        Ok(())
    })
}

fn match_info(other: &DisplayInfo, initiating_liker_id: i64) -> MatchInfo {
    MatchInfo {
        matched_user_id: other.user_id,
        name: other.name.clone(),
        first_photo_url: other.first_photo_url.clone(),
        is_online: other.is_online,
        last_seen: other.last_seen,
        initiating_liker_id,
    }
}

async fn load_display_info(hub: &Hub, user_id: i64) -> anyhow::Result<DisplayInfo> {
    hub.db()
        .call(move |db| db.display_info(user_id))
        .await?
        .ok_or_else(|| anyhow!("user {} vanished before notification", user_id))
}

fn spawn_bounded<F>(what: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::time::timeout(NOTIFY_TIMEOUT, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} notification failed: {:#}", what, e),
            Err(_) => warn!("{} notification timed out after {:?}", what, NOTIFY_TIMEOUT),
        }
    })
}
