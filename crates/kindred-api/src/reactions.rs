use axum::{
    Extension, Json,
    extract::{Path, State},
};

use kindred_gateway::reactions;
use kindred_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};

use crate::AppState;
use crate::error::ReactionRejection;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ReactionRejection> {
    let result = reactions::toggle_reaction(&state.hub, claims.sub, message_id, &req.emoji).await?;
    Ok(Json(ToggleReactionResponse { result }))
}
