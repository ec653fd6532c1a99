//! HTTP router for the monitoring and backplane surface

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::api::{control, system};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Monitoring
        .route("/health", get(system::health))
        .route("/metrics", get(system::metrics))
        // Backplane
        .route("/pause", post(control::pause))
        .route("/resume", post(control::resume))
        // State
        .with_state(state)
}
