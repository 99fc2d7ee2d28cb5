//! User-triggered subscription operations.
//!
//! Every mutating call holds the `(guild, feature)` lock for its read-check-write
//! sequence and writes with the version it read, so it can neither clobber nor be
//! clobbered by a sweep evaluating the same subscription.
//!
//! Credits always move before the subscription is written. If the write then fails,
//! the debit is refunded before the error is returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use entitle_core::{
    EntitlementError, FeatureDefinition, FeatureId, GuildId, Result, Subscription,
    SubscriptionKey, SubscriptionStatus, TransactionRecord, UserId,
};
use entitle_store::StoreError;

use crate::context::EngineContext;

/// Outcome of a successful activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationReceipt {
    /// Guild the feature was activated for.
    pub guild_id: GuildId,
    /// Activated feature.
    pub feature_id: FeatureId,
    /// Credits debited.
    pub cost: Decimal,
    /// Payer balance after the debit.
    pub balance: Decimal,
    /// Start of the next billing cycle.
    pub next_deduction_date: DateTime<Utc>,
    /// User-facing confirmation.
    pub message: String,
}

/// Outcome of a successful cancellation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationReceipt {
    /// Guild of the subscription.
    pub guild_id: GuildId,
    /// Cancelled feature.
    pub feature_id: FeatureId,
    /// When access ends.
    pub expires_at: DateTime<Utc>,
    /// User-facing confirmation.
    pub message: String,
}

/// Synchronous entitlement API.
#[derive(Clone)]
pub struct SubscriptionManager {
    ctx: Arc<EngineContext>,
}

impl SubscriptionManager {
    /// Create a manager over `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// The engine context.
    #[must_use]
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn feature(&self, feature_id: &FeatureId) -> Result<&FeatureDefinition> {
        self.ctx
            .catalog
            .by_id(feature_id)
            .ok_or_else(|| EntitlementError::UnknownFeature {
                feature_id: feature_id.clone(),
            })
    }

    /// Pay for and start a new billing cycle of `feature_id` in `guild_id`.
    ///
    /// # Errors
    ///
    /// - `UnknownFeature` if the feature is not in the catalog.
    /// - `AlreadyActive` if the guild is still entitled to the feature.
    /// - `InsufficientCredits` if the payer cannot cover the cost (nothing is debited).
    /// - `Unavailable` if the ledger or store fails.
    pub async fn activate_feature(
        &self,
        guild_id: GuildId,
        feature_id: &FeatureId,
        user_id: UserId,
    ) -> Result<ActivationReceipt> {
        let feature = self.feature(feature_id)?;
        let key = SubscriptionKey::new(guild_id, feature_id.clone());
        let guard = self.ctx.locks.lock(&key).await;
        let now = self.ctx.clock.now();

        let existing = self
            .ctx
            .store
            .get(&key)
            .await
            .map_err(|e| unavailable(&key, "load subscription", &e))?;
        if existing
            .as_ref()
            .is_some_and(|s| s.is_entitled_at(now, self.ctx.grace()))
        {
            return Err(EntitlementError::AlreadyActive {
                feature_id: feature_id.clone(),
            });
        }

        let balance = self
            .ctx
            .ledger
            .get_balance(user_id)
            .await
            .map_err(|e| unavailable(&key, "read balance", &e))?;
        if balance < feature.cost {
            tracing::info!(
                guild_id = %guild_id,
                feature_id = %feature_id,
                user_id = %user_id,
                balance = %balance,
                cost = %feature.cost,
                "Activation refused: insufficient credits"
            );
            return Err(EntitlementError::InsufficientCredits {
                balance,
                required: feature.cost,
            });
        }

        let balance = if feature.cost > Decimal::ZERO {
            self.ctx
                .ledger
                .debit(user_id, feature.cost)
                .await
                .map_err(|e| match e {
                    StoreError::InsufficientCredits { balance, required } => {
                        EntitlementError::InsufficientCredits { balance, required }
                    }
                    other => unavailable(&key, "debit", &other),
                })?
        } else {
            balance
        };

        let subscription = Subscription::activate(guild_id, feature, user_id, now);
        let expected = existing.as_ref().map(|s| s.version);
        if let Err(e) = self.ctx.store.put(&subscription, expected).await {
            let err = unavailable(&key, "persist activation", &e);
            self.ctx
                .refund(&key, user_id, feature.cost, "activation write failed")
                .await;
            return Err(err);
        }
        drop(guard);

        self.ctx
            .recorder
            .record(TransactionRecord::activation(
                guild_id,
                user_id,
                feature_id.clone(),
                feature.cost,
                subscription.next_deduction_date,
                now,
            ))
            .await;
        self.ctx.notifier.clear(guild_id, feature_id);
        self.ctx.hooks.activated(guild_id, feature_id).await;

        tracing::info!(
            guild_id = %guild_id,
            feature_id = %feature_id,
            user_id = %user_id,
            cost = %feature.cost,
            balance = %balance,
            next_deduction_date = %subscription.next_deduction_date,
            "Feature activated"
        );

        Ok(ActivationReceipt {
            guild_id,
            feature_id: feature_id.clone(),
            cost: feature.cost,
            balance,
            next_deduction_date: subscription.next_deduction_date,
            message: format!(
                "{} is now active. {} credits will be deducted again on {}.",
                feature.name,
                feature.cost,
                subscription.next_deduction_date.format("%Y-%m-%d")
            ),
        })
    }

    /// Stop auto-renewal. Access continues until the paid period ends.
    ///
    /// A subscription already past its paid period (in grace) loses access at once and
    /// is disabled as cancelled by the next sweep. Cancelling an already-cancelled
    /// subscription returns the same receipt again.
    ///
    /// # Errors
    ///
    /// - `UnknownFeature` if the feature is not in the catalog.
    /// - `NotActive` if there is no active subscription.
    /// - `Unauthorized` if `user_id` is not the payer.
    /// - `Unavailable` if the store fails.
    pub async fn cancel_feature(
        &self,
        guild_id: GuildId,
        feature_id: &FeatureId,
        user_id: UserId,
    ) -> Result<CancellationReceipt> {
        let feature = self.feature(feature_id)?;
        let key = SubscriptionKey::new(guild_id, feature_id.clone());
        let guard = self.ctx.locks.lock(&key).await;
        let now = self.ctx.clock.now();

        let mut subscription = self
            .ctx
            .store
            .get(&key)
            .await
            .map_err(|e| unavailable(&key, "load subscription", &e))?
            .filter(|s| s.active)
            .ok_or_else(|| EntitlementError::NotActive {
                feature_id: feature_id.clone(),
            })?;

        if subscription.payer_user_id != user_id {
            return Err(EntitlementError::Unauthorized { user_id });
        }

        // An unpaid subscription in its grace period loses access on cancellation
        let expires_at = subscription.next_deduction_date;
        let message = if subscription.is_due(now) {
            format!(
                "{} will not renew. Its last paid period ended on {}, so it is no longer active.",
                feature.name,
                expires_at.format("%Y-%m-%d")
            )
        } else {
            format!(
                "{} will not renew and stays active until {}.",
                feature.name,
                expires_at.format("%Y-%m-%d")
            )
        };
        let receipt = CancellationReceipt {
            guild_id,
            feature_id: feature_id.clone(),
            expires_at,
            message,
        };

        if subscription.is_cancelled() {
            return Ok(receipt);
        }

        let version = subscription.version;
        subscription.cancel(user_id, now);
        self.ctx
            .store
            .put(&subscription, Some(version))
            .await
            .map_err(|e| unavailable(&key, "persist cancellation", &e))?;
        drop(guard);

        self.ctx
            .recorder
            .record(TransactionRecord::cancellation(
                guild_id,
                user_id,
                feature_id.clone(),
                expires_at,
                now,
            ))
            .await;

        tracing::info!(
            guild_id = %guild_id,
            feature_id = %feature_id,
            user_id = %user_id,
            expires_at = %expires_at,
            "Feature cancelled"
        );

        Ok(receipt)
    }

    /// Whether the guild currently has access to the feature.
    ///
    /// # Errors
    ///
    /// - `UnknownFeature` if the feature is not in the catalog.
    /// - `Unavailable` if the store fails.
    pub async fn is_feature_active(&self, guild_id: GuildId, feature_id: &FeatureId) -> Result<bool> {
        self.feature(feature_id)?;
        let key = SubscriptionKey::new(guild_id, feature_id.clone());
        let subscription = self
            .ctx
            .store
            .get(&key)
            .await
            .map_err(|e| unavailable(&key, "load subscription", &e))?;

        let now = self.ctx.clock.now();
        Ok(subscription.is_some_and(|s| s.is_entitled_at(now, self.ctx.grace())))
    }

    /// Status of one subscription, or `None` if the guild never activated the feature.
    ///
    /// Records of features since removed from the catalog are still reported.
    ///
    /// # Errors
    ///
    /// - `UnknownFeature` if there is no record and the feature is not in the catalog.
    /// - `Unavailable` if the store fails.
    pub async fn get_subscription_status(
        &self,
        guild_id: GuildId,
        feature_id: &FeatureId,
    ) -> Result<Option<SubscriptionStatus>> {
        let key = SubscriptionKey::new(guild_id, feature_id.clone());
        let subscription = self
            .ctx
            .store
            .get(&key)
            .await
            .map_err(|e| unavailable(&key, "load subscription", &e))?;

        match subscription {
            Some(subscription) => Ok(Some(self.project(&subscription))),
            None => self.feature(feature_id).map(|_| None),
        }
    }

    /// Status of every subscription of a guild, ordered by feature id.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store fails.
    pub async fn list_guild_features(&self, guild_id: GuildId) -> Result<Vec<SubscriptionStatus>> {
        let subscriptions = self.ctx.store.list_by_guild(guild_id).await.map_err(|e| {
            tracing::error!(guild_id = %guild_id, error = %e, "Failed to list subscriptions");
            EntitlementError::Unavailable(e.to_string())
        })?;

        let mut statuses: Vec<_> = subscriptions.iter().map(|s| self.project(s)).collect();
        statuses.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
        Ok(statuses)
    }

    fn project(&self, subscription: &Subscription) -> SubscriptionStatus {
        let name = self
            .ctx
            .catalog
            .by_id(&subscription.feature_id)
            .map(|f| f.name.clone());
        SubscriptionStatus::project(
            subscription,
            name,
            self.ctx.clock.now(),
            self.ctx.grace(),
            self.ctx.horizon(),
        )
    }
}

/// Log an infrastructure failure with its subscription and hide it behind `Unavailable`.
fn unavailable(key: &SubscriptionKey, operation: &str, err: &StoreError) -> EntitlementError {
    tracing::error!(
        guild_id = %key.guild_id,
        feature_id = %key.feature_id,
        operation = %operation,
        error = %err,
        "Entitlement operation failed"
    );
    EntitlementError::Unavailable(format!("{operation}: {err}"))
}
