//! Backplane pause/resume endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub paused: bool,
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Json<PauseResponse> {
    state.gate.set(true);
    state.metrics.paused.set(1);
    warn!("provisioning paused via backplane");

    Json(PauseResponse { paused: true })
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Json<PauseResponse> {
    state.gate.set(false);
    state.metrics.paused.set(0);
    warn!("provisioning resumed via backplane");

    Json(PauseResponse { paused: false })
}
