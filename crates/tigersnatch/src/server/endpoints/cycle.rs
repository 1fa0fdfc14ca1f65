//! Manual control of the notification cycle.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::dispatch::CycleOutcome;
use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// POST /cycle/run
///
/// Runs one cycle immediately, outside the window schedule. Returns 409 if
/// a cycle is already in flight.
pub async fn post_run_cycle(State(s): State<Arc<AppState>>) -> Response {
    info!("POST /cycle/run");

    match s.runner.run_cycle().await {
        Ok(CycleOutcome::Completed(summary)) => (
            StatusCode::OK,
            Json(json!({
                "outcome": "completed",
                "emails_sent": summary.emails_sent,
                "emails_attempted": summary.emails_attempted,
                "texts_sent": summary.texts_sent,
                "texts_attempted": summary.texts_attempted,
                "sections": summary.sections,
                "courses_examined": summary.courses_examined,
                "skipped_recipients": summary.skipped_recipients,
                "failed_batches": summary.failed_batches,
                "duration_ms": summary.duration.as_millis() as u64,
            })),
        )
            .into_response(),
        Ok(CycleOutcome::Killed) => (
            StatusCode::OK,
            Json(json!({ "outcome": "killed", "reason": "maintenance mode" })),
        )
            .into_response(),
        Ok(CycleOutcome::Skipped) => ApiErrorType::from((
            StatusCode::CONFLICT,
            "A cycle is already running",
            None,
        ))
        .into_response(),
        Err(e) => {
            error!("Manual cycle failed: {}", e);
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cycle failed",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}

fn toggle_response(result: Result<(), crate::error::StoreError>, enabled: bool) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "trigger_enabled": enabled }))).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to update cycle trigger",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}

/// POST /cycle/enable
pub async fn post_enable_trigger(State(s): State<Arc<AppState>>) -> Response {
    info!("POST /cycle/enable");
    toggle_response(s.scheduler.enable_trigger(), true)
}

/// POST /cycle/disable
///
/// Scheduled ticks are skipped until re-enabled; windows keep opening and
/// closing as usual.
pub async fn post_disable_trigger(State(s): State<Arc<AppState>>) -> Response {
    info!("POST /cycle/disable");
    toggle_response(s.scheduler.disable_trigger(), false)
}
