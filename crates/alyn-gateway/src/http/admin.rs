//! Observability and maintenance routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::app::AppState;

pub async fn history(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let entries = state.log.entries().await.map_err(|e| {
        error!(error = %e, "failed to read conversation log");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let items: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "tag": entry.tag,
                "timestamp": entry.timestamp,
                "payload": entry.payload,
            })
        })
        .collect();
    Ok(Json(json!({"entries": items, "total": items.len()})))
}

pub async fn clear(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    state.log.clear().await.map_err(|e| {
        error!(error = %e, "failed to clear conversation log");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({"status": "cleared"})))
}

pub async fn list_triggers(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let triggers = state.triggers.list_all().map_err(|e| {
        error!(error = %e, "failed to list triggers");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({"triggers": triggers, "total": triggers.len()})))
}
