//! Manual sweep trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::sweeper::SweepReport;

/// Run one sweep tick now (admin only). Returns 409 if a tick is already running.
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<SweepReport>, ApiError> {
    tracing::info!(admin_id = %auth.admin_id, "Manual sweep requested");
    Ok(Json(state.sweeper.run_once().await?))
}
