//! Liveness and engine state.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Engine health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Build version.
    pub version: &'static str,
    /// Whether the renewal timer is running.
    pub sweeper_started: bool,
    /// Features in the loaded catalog.
    pub catalog_features: usize,
}

/// Health check endpoint (no auth).
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sweeper_started: state.sweeper.is_started(),
        catalog_features: state.ctx.catalog.len(),
    })
}
