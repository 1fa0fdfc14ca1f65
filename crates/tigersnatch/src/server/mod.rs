use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::server::endpoints::{cycle, status};
use crate::types::AppState;

mod endpoints;
mod types;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cycle_router = Router::new()
        .route("/run", post(cycle::post_run_cycle))
        .route("/enable", post(cycle::post_enable_trigger))
        .route("/disable", post(cycle::post_disable_trigger));

    Router::new()
        .route("/health", get(status::get_health))
        .route("/status", get(status::get_status))
        .nest("/cycle", cycle_router)
        .with_state(app_state)
}
