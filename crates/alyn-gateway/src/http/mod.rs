//! HTTP surface of the gateway.

pub mod admin;
pub mod chat;
pub mod health;
pub mod telegram;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/chat/inbound", post(chat::inbound))
        .route("/api/telegram/webhook", post(telegram::webhook))
        .route("/api/conversation/history", get(admin::history))
        .route("/api/conversation/clear", post(admin::clear))
        .route("/api/triggers", get(admin::list_triggers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
