//! Credit balance handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use entitle_core::UserId;

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The user.
    pub user_id: UserId,
    /// Current balance in credits.
    pub balance: Decimal,
}

/// Get a user's credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ctx.ledger.get_balance(user_id).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Grant credits request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Recipient.
    pub user_id: UserId,
    /// Credits to add.
    pub amount: Decimal,
    /// Why (for audit logging).
    pub reason: String,
}

/// Add credits to a user's balance (admin only).
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(request): Json<GrantCreditsRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    if request.amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let balance = state
        .ctx
        .ledger
        .credit(request.user_id, request.amount)
        .await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        user_id = %request.user_id,
        amount = %request.amount,
        balance = %balance,
        reason = %request.reason,
        "Credits granted"
    );

    Ok(Json(BalanceResponse {
        user_id: request.user_id,
        balance,
    }))
}
