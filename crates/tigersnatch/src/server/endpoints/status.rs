use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;
use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// GET /health
pub async fn get_health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

fn status_body(s: &AppState) -> Result<serde_json::Value, StoreError> {
    Ok(json!({
        "description": s.scheduler.current_or_next_window_description()?,
        "notifs_active": s.store.notifs_active()?,
        "trigger_enabled": s.store.trigger_enabled()?,
        "maintenance": s.store.maintenance_mode()?,
        "live_status": s.store.live_status()?,
        "windows": s.store.notifs_schedule()?,
    }))
}

/// GET /status
///
/// Current or next window description plus the flags the status display reads.
pub async fn get_status(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /status");

    match status_body(&s) {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read notifier status",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
