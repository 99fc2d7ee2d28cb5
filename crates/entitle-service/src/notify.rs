//! Outbound payer notifications.
//!
//! Delivery (direct messages) lives outside the engine behind [`NotificationDispatcher`].
//! All sends are best-effort: failures are logged and never affect subscription state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use entitle_core::{DisableReason, FeatureId, GuildId, UserId};

use crate::dedup::{WarningCache, WarningKey, WarningKind};

/// Transport failure reported by a dispatcher.
#[derive(Debug, thiserror::Error)]
#[error("notification transport failed: {0}")]
pub struct NotifyError(pub String);

/// Upcoming renewal the payer cannot currently afford.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowBalanceWarning {
    /// Guild of the subscription.
    pub guild_id: GuildId,
    /// Feature of the subscription.
    pub feature_id: FeatureId,
    /// Display name of the feature.
    pub feature_name: String,
    /// Recipient.
    pub user_id: UserId,
    /// Renewal cost.
    pub cost: Decimal,
    /// Current balance.
    pub balance: Decimal,
    /// When the renewal is due.
    pub due_at: DateTime<Utc>,
}

/// Renewal failed; access continues until the grace deadline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GracePeriodWarning {
    /// Guild of the subscription.
    pub guild_id: GuildId,
    /// Feature of the subscription.
    pub feature_id: FeatureId,
    /// Display name of the feature.
    pub feature_name: String,
    /// Recipient.
    pub user_id: UserId,
    /// Renewal cost.
    pub cost: Decimal,
    /// Current balance.
    pub balance: Decimal,
    /// When the subscription will be disabled without a top-up.
    pub grace_deadline: DateTime<Utc>,
}

/// A subscription was disabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeactivationNotice {
    /// Guild of the subscription.
    pub guild_id: GuildId,
    /// Feature of the subscription.
    pub feature_id: FeatureId,
    /// Recipient (the payer).
    pub user_id: UserId,
    /// Why it was disabled.
    pub reason: DisableReason,
}

/// Outbound notification transport.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Tell the payer an upcoming renewal is underfunded.
    async fn send_low_balance_warning(&self, warning: &LowBalanceWarning) -> Result<(), NotifyError>;

    /// Tell the payer a renewal failed and the grace period started.
    async fn send_grace_period_warning(
        &self,
        warning: &GracePeriodWarning,
    ) -> Result<(), NotifyError>;

    /// Tell the payer a subscription was disabled.
    async fn send_deactivation_notice(&self, notice: &DeactivationNotice) -> Result<(), NotifyError>;
}

/// Dispatcher that only logs. Used when no transport is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn send_low_balance_warning(&self, warning: &LowBalanceWarning) -> Result<(), NotifyError> {
        tracing::info!(
            guild_id = %warning.guild_id,
            feature_id = %warning.feature_id,
            user_id = %warning.user_id,
            cost = %warning.cost,
            balance = %warning.balance,
            due_at = %warning.due_at,
            "Low balance warning"
        );
        Ok(())
    }

    async fn send_grace_period_warning(
        &self,
        warning: &GracePeriodWarning,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            guild_id = %warning.guild_id,
            feature_id = %warning.feature_id,
            user_id = %warning.user_id,
            cost = %warning.cost,
            balance = %warning.balance,
            grace_deadline = %warning.grace_deadline,
            "Grace period warning"
        );
        Ok(())
    }

    async fn send_deactivation_notice(&self, notice: &DeactivationNotice) -> Result<(), NotifyError> {
        tracing::info!(
            guild_id = %notice.guild_id,
            feature_id = %notice.feature_id,
            user_id = %notice.user_id,
            reason = %notice.reason,
            "Deactivation notice"
        );
        Ok(())
    }
}

/// Deduplicating, failure-tolerant front of a dispatcher.
pub struct WarningNotifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    cache: WarningCache,
}

impl WarningNotifier {
    /// Wrap `dispatcher` with `cache`.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, cache: WarningCache) -> Self {
        Self { dispatcher, cache }
    }

    /// Send a low-balance warning unless one is already on record.
    ///
    /// Returns `true` if a send was attempted.
    pub async fn warn_low_balance(&self, warning: &LowBalanceWarning) -> bool {
        let key = WarningKey::new(
            warning.guild_id,
            warning.feature_id.clone(),
            warning.user_id,
            WarningKind::LowBalance,
        );
        if !self.cache.try_claim(key) {
            return false;
        }

        if let Err(e) = self.dispatcher.send_low_balance_warning(warning).await {
            tracing::warn!(
                guild_id = %warning.guild_id,
                feature_id = %warning.feature_id,
                user_id = %warning.user_id,
                error = %e,
                "Failed to send low balance warning"
            );
        }
        true
    }

    /// Send a grace-period warning unless one is already on record.
    ///
    /// Returns `true` if a send was attempted.
    pub async fn warn_grace_period(&self, warning: &GracePeriodWarning) -> bool {
        let key = WarningKey::new(
            warning.guild_id,
            warning.feature_id.clone(),
            warning.user_id,
            WarningKind::GracePeriod,
        );
        if !self.cache.try_claim(key) {
            return false;
        }

        if let Err(e) = self.dispatcher.send_grace_period_warning(warning).await {
            tracing::warn!(
                guild_id = %warning.guild_id,
                feature_id = %warning.feature_id,
                user_id = %warning.user_id,
                error = %e,
                "Failed to send grace period warning"
            );
        }
        true
    }

    /// Send a deactivation notice. Not deduplicated: disablement happens once.
    pub async fn notify_deactivation(&self, notice: &DeactivationNotice) {
        if let Err(e) = self.dispatcher.send_deactivation_notice(notice).await {
            tracing::warn!(
                guild_id = %notice.guild_id,
                feature_id = %notice.feature_id,
                user_id = %notice.user_id,
                error = %e,
                "Failed to send deactivation notice"
            );
        }
    }

    /// Forget the warnings of a subscription after it changed state.
    pub fn clear(&self, guild_id: GuildId, feature_id: &FeatureId) {
        self.cache.clear(guild_id, feature_id);
    }
}
