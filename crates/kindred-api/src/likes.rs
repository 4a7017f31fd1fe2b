use axum::{Extension, Json, extract::State, http::StatusCode};

use kindred_types::api::{Claims, LikeAllowance, LikeRequest, LikeResponse, TargetUserRequest};

use crate::AppState;
use crate::error::InteractionError;
use crate::interactions;

pub async fn create_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LikeRequest>,
) -> Result<(StatusCode, Json<LikeResponse>), InteractionError> {
    let res = interactions::process_like(&state, claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

pub async fn allowance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LikeAllowance>, InteractionError> {
    Ok(Json(interactions::like_allowance(&state, claims.sub).await?))
}

pub async fn dislike(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TargetUserRequest>,
) -> Result<StatusCode, InteractionError> {
    interactions::process_dislike(&state, claims.sub, req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmatch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TargetUserRequest>,
) -> Result<StatusCode, InteractionError> {
    interactions::process_unmatch(&state, claims.sub, req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
