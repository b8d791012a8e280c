//! Generic inbound chat surface.
//!
//! Accepts a message, returns 202 immediately, and processes the turn in
//! a spawned task; replies go out through the outbound adapter.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use alyn_core::context::{current_channel, with_channel};

use crate::app::AppState;

/// Short, non-technical reply used when a turn fails internally.
pub const GENERIC_ERROR_REPLY: &str = "Une erreur s'est produite. Réessaie ?";

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub message: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

pub async fn inbound(
    State(state): State<AppState>,
    Json(payload): Json<InboundMessage>,
) -> (StatusCode, Json<Value>) {
    if payload.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        );
    }

    tokio::spawn(with_channel(
        payload.channel_id.clone(),
        process_turn(state, payload.message),
    ));

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"})))
}

/// Run one interaction turn; internal failures become a short canned
/// apology rather than surfacing raw errors to the user.
pub(crate) async fn process_turn(state: AppState, message: String) {
    let result = state.interaction.handle_user_message(&message).await;
    if result.success {
        return;
    }
    error!(error = ?result.error, "interaction turn failed");
    if let Some(channel_id) = current_channel() {
        state.outbound.send(&channel_id, GENERIC_ERROR_REPLY).await;
    }
}
