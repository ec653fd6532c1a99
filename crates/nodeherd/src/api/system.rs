//! Health and metrics endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::Serialize;

use nodeherd_core::message::GetStatus;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub paused: bool,
    pub in_flight: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let in_flight = state
        .orchestrator
        .ask(GetStatus)
        .await
        .map(|status| status.in_flight)
        .unwrap_or(0);

    let paused = state.gate.is_paused();

    Json(HealthResponse {
        status: if paused { "paused" } else { "ok" }.to_string(),
        paused,
        in_flight,
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
