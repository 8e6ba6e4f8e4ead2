// Library interface for hub_server
// Exposes the router so tests and embedding servers can mount the hub endpoints

pub mod config;
pub mod handlers;
pub mod websocket;

use axum::{
    Router,
    routing::{get, post},
};
use realtime_hub::HubHandle;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route("/api/messages/realtime", post(handlers::send_message_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}
