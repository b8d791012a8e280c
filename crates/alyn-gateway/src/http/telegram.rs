//! Telegram webhook receiver.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use alyn_core::context::with_channel;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

/// Telegram retries non-200 responses, so every update is acknowledged;
/// updates without text are simply dropped.
pub async fn webhook(
    State(state): State<AppState>,
    Json(update): Json<TelegramUpdate>,
) -> StatusCode {
    let Some(message) = update.message else {
        debug!("ignoring Telegram update without message");
        return StatusCode::OK;
    };
    let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
        debug!("ignoring Telegram message without text");
        return StatusCode::OK;
    };
    let chat_id = message.chat.id.to_string();

    if let Some(api) = &state.telegram {
        api.send_typing(&chat_id).await;
    }

    tokio::spawn(with_channel(
        Some(chat_id),
        super::chat::process_turn(state, text),
    ));

    StatusCode::OK
}
