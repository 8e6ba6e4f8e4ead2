use axum::{
    Json,
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use realtime_hub::{Identity, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::AppState;
use crate::websocket::handle_websocket;

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl ConnectParams {
    /// Identity asserted by the caller. Not authenticated here.
    fn identity(&self) -> Result<Identity, &'static str> {
        let (user_id, username) = match (self.user_id.as_deref(), self.username.as_deref()) {
            (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => (id, name),
            _ => return Err("user_id and username are required"),
        };
        match user_id.parse::<u64>() {
            Ok(id) if id != 0 => Ok(Identity::new(UserId(id), username)),
            _ => Err("invalid user_id"),
        }
    }
}

/// `GET /ws?user_id=..&username=..`
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Identity is checked before the upgrade so bad requests get a JSON body
    let identity = match params.identity() {
        Ok(identity) => identity,
        Err(message) => {
            debug!(?params, "Rejecting connect request: {}", message);
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    ws.on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_websocket(socket, hub, identity))
}

#[derive(Debug, Deserialize)]
pub struct RealtimeMessageRequest {
    pub from_user_id: u64,
    pub to_user_id: u64,
    pub content: String,
}

/// `POST /api/messages/realtime`: push a stored message to its recipient if online.
pub async fn send_message_handler(
    State(state): State<AppState>,
    Json(req): Json<RealtimeMessageRequest>,
) -> Response {
    if req.from_user_id == 0 || req.to_user_id == 0 {
        return error_response(StatusCode::BAD_REQUEST, "invalid user id");
    }
    if req.content.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content is required");
    }

    match state
        .hub
        .send_private_message(UserId(req.from_user_id), UserId(req.to_user_id), req.content)
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "queued": true })),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub uptime_secs: u64,
}

/// Health check endpoint. Connection count comes from the control loop.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime_secs = state.hub.metrics().uptime_secs();
    match state.hub.connected_users().await {
        Ok(users) => Json(HealthStatus {
            status: "healthy".to_string(),
            connections: users.len() as u64,
            uptime_secs,
        })
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "unavailable".to_string(),
                connections: 0,
                uptime_secs,
            }),
        )
            .into_response(),
    }
}

/// Metrics endpoint - returns the hub counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.metrics().snapshot())
}
