use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use kindred_gateway::reactions::ReactionError;

/// Outcome of a rejected like, dislike or unmatch.
///
/// Resource-exhaustion variants are distinct so clients can show a specific
/// prompt (e.g. "buy more roses").
#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error("{0}")]
    Validation(String),
    #[error("user not found")]
    UserNotFound,
    #[error("a comment is required for this like")]
    CommentRequired,
    #[error("not enough roses")]
    InsufficientConsumables,
    #[error("daily like limit reached")]
    LikeLimitReached,
    #[error("already liked")]
    AlreadyLiked,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl InteractionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::CommentRequired => StatusCode::BAD_REQUEST,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::InsufficientConsumables => StatusCode::PAYMENT_REQUIRED,
            Self::LikeLimitReached => StatusCode::TOO_MANY_REQUESTS,
            Self::AlreadyLiked => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for InteractionError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("interaction failed: {:#}", e);
        }
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// HTTP mapping for reaction failures raised by the gateway crate.
#[derive(Debug)]
pub struct ReactionRejection(pub ReactionError);

impl From<ReactionError> for ReactionRejection {
    fn from(e: ReactionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ReactionRejection {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReactionError::InvalidEmoji => StatusCode::BAD_REQUEST,
            ReactionError::MessageNotFound => StatusCode::NOT_FOUND,
            ReactionError::NotParticipant => StatusCode::FORBIDDEN,
            ReactionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
