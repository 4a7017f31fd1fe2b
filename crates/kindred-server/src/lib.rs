pub mod config;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use kindred_api::middleware::{decode_token, require_auth};
use kindred_api::{AppState, likes, reactions};
use kindred_gateway::connection;

/// Full HTTP surface: the authenticated REST routes, the gateway socket and
/// the health probe.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/likes", post(likes::create_like))
        .route("/likes/allowance", get(likes::allowance))
        .route("/dislikes", post(likes::dislike))
        .route("/unmatch", post(likes::unmatch))
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(protected_routes)
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`.
async fn ws_upgrade(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer
        .as_ref()
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or(params.token);

    let Some(claims) = token.and_then(|t| decode_token(&state.jwt_secret, &t)) else {
        debug!("gateway upgrade rejected: missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, claims.sub))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "online_count": state.hub.online_count(),
    }))
}
