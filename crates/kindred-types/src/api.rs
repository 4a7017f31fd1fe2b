use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade.
/// Tokens are issued by the sign-in service; this workspace only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

// -- Likes --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LikeRequest {
    pub liked_user_id: i64,
    /// Validated against `ContentType` by the processor so the error order
    /// matches the rest of the validation chain.
    pub content_type: String,
    pub content_identifier: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub interaction_type: Option<crate::models::InteractionKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeResponse {
    pub like_id: i64,
    pub is_match: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetUserRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LikeAllowance {
    /// `None` when an unlimited-likes subscription is active.
    pub standard_likes_remaining: Option<u32>,
    pub roses: i64,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionOutcome {
    Added,
    Removed,
    Updated,
}

#[derive(Debug, Serialize)]
pub struct ToggleReactionResponse {
    pub result: ReactionOutcome,
}
