//! Feature catalog, subscription and guild history handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use entitle_core::{
    BillingPeriod, FeatureDefinition, FeatureId, GuildId, SubscriptionStatus, TransactionRecord,
    UserId,
};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::manager::{ActivationReceipt, CancellationReceipt};
use crate::state::AppState;

/// Catalog entry.
#[derive(Debug, Serialize)]
pub struct FeatureResponse {
    /// Feature id.
    pub id: FeatureId,
    /// Display name.
    pub name: String,
    /// Credits per period.
    pub cost: Decimal,
    /// Billing period.
    pub period: BillingPeriod,
    /// Days per period.
    pub period_days: u32,
    /// What the feature includes.
    pub includes: Vec<String>,
}

impl From<&FeatureDefinition> for FeatureResponse {
    fn from(feature: &FeatureDefinition) -> Self {
        Self {
            id: feature.id.clone(),
            name: feature.name.clone(),
            cost: feature.cost,
            period: feature.period,
            period_days: feature.period_days,
            includes: feature.includes.clone(),
        }
    }
}

/// List the feature catalog.
pub async fn list_catalog(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Json<Vec<FeatureResponse>> {
    Json(
        state
            .ctx
            .catalog
            .list()
            .into_iter()
            .map(FeatureResponse::from)
            .collect(),
    )
}

/// List the subscriptions of a guild.
pub async fn list_guild_features(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(guild_id): Path<GuildId>,
) -> Result<Json<Vec<SubscriptionStatus>>, ApiError> {
    Ok(Json(state.manager.list_guild_features(guild_id).await?))
}

/// Get one subscription's status.
pub async fn get_feature_status(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((guild_id, feature_id)): Path<(GuildId, FeatureId)>,
) -> Result<Json<SubscriptionStatus>, ApiError> {
    state
        .manager
        .get_subscription_status(guild_id, &feature_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("guild {guild_id} has no {feature_id} subscription"))
        })
}

/// Entitlement check response.
#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    /// Guild checked.
    pub guild_id: GuildId,
    /// Feature checked.
    pub feature_id: FeatureId,
    /// Whether the guild has access.
    pub active: bool,
}

/// Check whether a guild has access to a feature.
pub async fn is_feature_active(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((guild_id, feature_id)): Path<(GuildId, FeatureId)>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let active = state.manager.is_feature_active(guild_id, &feature_id).await?;
    Ok(Json(ActiveResponse {
        guild_id,
        feature_id,
        active,
    }))
}

/// Body of activate and cancel requests.
#[derive(Debug, Deserialize)]
pub struct PayerRequest {
    /// The chat user issuing the command.
    pub user_id: UserId,
}

/// Activate a feature for a guild, paid by the requesting user.
pub async fn activate_feature(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((guild_id, feature_id)): Path<(GuildId, FeatureId)>,
    Json(request): Json<PayerRequest>,
) -> Result<Json<ActivationReceipt>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        guild_id = %guild_id,
        feature_id = %feature_id,
        user_id = %request.user_id,
        "Activation requested"
    );
    let receipt = state
        .manager
        .activate_feature(guild_id, &feature_id, request.user_id)
        .await?;
    Ok(Json(receipt))
}

/// Cancel auto-renewal of a guild's feature.
pub async fn cancel_feature(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((guild_id, feature_id)): Path<(GuildId, FeatureId)>,
    Json(request): Json<PayerRequest>,
) -> Result<Json<CancellationReceipt>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        guild_id = %guild_id,
        feature_id = %feature_id,
        user_id = %request.user_id,
        "Cancellation requested"
    );
    let receipt = state
        .manager
        .cancel_feature(guild_id, &feature_id, request.user_id)
        .await?;
    Ok(Json(receipt))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Paying or acting user.
    pub user_id: UserId,
    /// Feature.
    pub feature_id: FeatureId,
    /// Transaction type.
    pub kind: String,
    /// Amount (negative = debit).
    pub amount: Decimal,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event context.
    pub metadata: serde_json::Value,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(tx: TransactionRecord) -> Self {
        Self {
            id: tx.id.to_string(),
            user_id: tx.user_id,
            feature_id: tx.feature_id,
            kind: format!("{:?}", tx.kind).to_lowercase(),
            amount: tx.amount,
            timestamp: tx.timestamp,
            metadata: tx.metadata,
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List a guild's subscription history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(guild_id): Path<GuildId>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let mut transactions = state
        .ctx
        .recorder
        .history(guild_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(ListTransactionsResponse {
        transactions: transactions.into_iter().map(Into::into).collect(),
        has_more,
    }))
}
