//! Subscription (entitlement) types.
//!
//! A [`Subscription`] is the single record tracking whether a guild has a feature and
//! when it must next be billed. There is exactly one record per (guild, feature); it
//! is created on activation, mutated by cancellation and by the renewal sweep, and never
//! deleted. Disablement is a terminal flag until the next activation starts a new cycle.
//!
//! # State machine
//!
//! ```text
//! ActiveCurrent -> ActivePendingRenewal -> { ActiveCurrent (renewed) | ActiveGracePeriod } -> Disabled
//! CancelledPendingExpiry -> Disabled
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{BillingPeriod, FeatureDefinition};
use crate::{FeatureId, GuildId, UserId};

/// Addresses one subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Owning guild.
    pub guild_id: GuildId,
    /// Feature within the guild.
    pub feature_id: FeatureId,
}

impl SubscriptionKey {
    /// Create a key.
    #[must_use]
    pub fn new(guild_id: GuildId, feature_id: FeatureId) -> Self {
        Self {
            guild_id,
            feature_id,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.feature_id)
    }
}

/// A guild's entitlement to one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Owning guild.
    pub guild_id: GuildId,

    /// Catalog feature.
    pub feature_id: FeatureId,

    /// False once disabled.
    pub active: bool,

    /// The user whose credits pay for the feature.
    pub payer_user_id: UserId,

    /// Start of the current activation.
    pub activated_at: DateTime<Utc>,

    /// When credits were last taken.
    pub last_deduction_date: DateTime<Utc>,

    /// When credits must next be taken.
    pub next_deduction_date: DateTime<Utc>,

    /// Cost snapshotted at activation or last renewal.
    pub cost: Decimal,

    /// Period unit snapshotted at activation or last renewal.
    pub period: BillingPeriod,

    /// Period length snapshotted at activation or last renewal.
    pub period_days: u32,

    /// False once cancelled; the paid period still runs out.
    pub auto_renew: bool,

    /// When the payer cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Who cancelled.
    pub cancelled_by: Option<UserId>,

    /// When the subscription was disabled.
    pub disabled_at: Option<DateTime<Utc>>,

    /// Why the subscription was disabled.
    pub disable_reason: Option<DisableReason>,

    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl Subscription {
    /// Start a new billing cycle for a freshly paid activation.
    #[must_use]
    pub fn activate(
        guild_id: GuildId,
        feature: &FeatureDefinition,
        payer_user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            guild_id,
            feature_id: feature.id.clone(),
            active: true,
            payer_user_id,
            activated_at: now,
            last_deduction_date: now,
            next_deduction_date: now + days(feature.period_days),
            cost: feature.cost,
            period: feature.period,
            period_days: feature.period_days,
            auto_renew: true,
            cancelled_at: None,
            cancelled_by: None,
            disabled_at: None,
            disable_reason: None,
            version: 0,
        }
    }

    /// The store key of this record.
    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.guild_id, self.feature_id.clone())
    }

    /// Stop future billing. Access continues until `next_deduction_date`.
    pub fn cancel(&mut self, cancelled_by: UserId, now: DateTime<Utc>) {
        self.auto_renew = false;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(cancelled_by);
    }

    /// Record a successful renewal debit and move to the next cycle.
    ///
    /// The new cycle is priced from the current catalog definition.
    pub fn renew(&mut self, feature: &FeatureDefinition, now: DateTime<Utc>) {
        self.last_deduction_date = now;
        self.next_deduction_date += days(feature.period_days);
        self.cost = feature.cost;
        self.period = feature.period;
        self.period_days = feature.period_days;
    }

    /// Move to the terminal disabled state.
    pub fn disable(&mut self, reason: DisableReason, now: DateTime<Utc>) {
        self.active = false;
        self.disabled_at = Some(now);
        self.disable_reason = Some(reason);
    }

    /// Whether the payer has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.auto_renew
    }

    /// Whether billing is due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_deduction_date
    }

    /// Last instant a failed renewal is tolerated.
    #[must_use]
    pub fn grace_deadline(&self, grace: Duration) -> DateTime<Utc> {
        self.next_deduction_date + grace
    }

    /// Whether the next deduction is upcoming and within `horizon`.
    #[must_use]
    pub fn within_warning_horizon(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        now < self.next_deduction_date && self.next_deduction_date <= now + horizon
    }

    /// Whether the guild currently has access.
    ///
    /// Auto-renewing subscriptions keep access through the grace period; cancelled ones
    /// lose it as soon as the paid period ends.
    #[must_use]
    pub fn is_entitled_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        if !self.active {
            return false;
        }
        if self.auto_renew {
            now < self.grace_deadline(grace)
        } else {
            now < self.next_deduction_date
        }
    }

    /// Lifecycle phase at `now`.
    #[must_use]
    pub fn phase(&self, now: DateTime<Utc>, horizon: Duration) -> SubscriptionPhase {
        if !self.active {
            SubscriptionPhase::Disabled
        } else if !self.auto_renew {
            SubscriptionPhase::CancelledPendingExpiry
        } else if self.is_due(now) {
            SubscriptionPhase::ActiveGracePeriod
        } else if self.within_warning_horizon(now, horizon) {
            SubscriptionPhase::ActivePendingRenewal
        } else {
            SubscriptionPhase::ActiveCurrent
        }
    }
}

fn days(count: u32) -> Duration {
    Duration::days(i64::from(count))
}

/// Why a subscription was disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// The feature is no longer in the catalog.
    FeatureRemoved,
    /// The payer cancelled and the paid period ran out.
    Cancelled,
    /// Renewal failed and the grace period elapsed.
    InsufficientBalance,
}

impl DisableReason {
    /// Snake-case name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeatureRemoved => "feature_removed",
            Self::Cancelled => "cancelled",
            Self::InsufficientBalance => "insufficient_balance",
        }
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPhase {
    /// Paid up, next deduction outside the warning horizon.
    ActiveCurrent,
    /// Next deduction within the warning horizon.
    ActivePendingRenewal,
    /// Deduction due but not yet taken; access continues until the grace deadline.
    ActiveGracePeriod,
    /// Cancelled; access continues until the paid period ends.
    CancelledPendingExpiry,
    /// Terminal until re-activated.
    Disabled,
}

/// Read-only projection of a subscription for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    /// Owning guild.
    pub guild_id: GuildId,
    /// Catalog feature.
    pub feature_id: FeatureId,
    /// Display name from the catalog, if the feature still exists.
    pub feature_name: Option<String>,
    /// Stored active flag.
    pub active: bool,
    /// Whether the guild has access right now.
    pub entitled: bool,
    /// Lifecycle phase.
    pub phase: SubscriptionPhase,
    /// Paying user.
    pub payer_user_id: UserId,
    /// Start of the current activation.
    pub activated_at: DateTime<Utc>,
    /// Last deduction.
    pub last_deduction_date: DateTime<Utc>,
    /// Next deduction.
    pub next_deduction_date: DateTime<Utc>,
    /// Latest moment access survives an unpaid renewal (auto-renewing only).
    pub grace_deadline: Option<DateTime<Utc>>,
    /// When access ends (cancelled only).
    pub expires_at: Option<DateTime<Utc>>,
    /// Cost per period.
    pub cost: Decimal,
    /// Period unit.
    pub period: BillingPeriod,
    /// Period length.
    pub period_days: u32,
    /// Whether the subscription will renew.
    pub auto_renew: bool,
    /// Cancellation time.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Disable time.
    pub disabled_at: Option<DateTime<Utc>>,
    /// Disable reason.
    pub disable_reason: Option<DisableReason>,
}

impl SubscriptionStatus {
    /// Project a subscription as seen at `now`.
    #[must_use]
    pub fn project(
        subscription: &Subscription,
        feature_name: Option<String>,
        now: DateTime<Utc>,
        grace: Duration,
        horizon: Duration,
    ) -> Self {
        let renewing = subscription.active && subscription.auto_renew;
        let cancelled = subscription.active && !subscription.auto_renew;
        Self {
            guild_id: subscription.guild_id,
            feature_id: subscription.feature_id.clone(),
            feature_name,
            active: subscription.active,
            entitled: subscription.is_entitled_at(now, grace),
            phase: subscription.phase(now, horizon),
            payer_user_id: subscription.payer_user_id,
            activated_at: subscription.activated_at,
            last_deduction_date: subscription.last_deduction_date,
            next_deduction_date: subscription.next_deduction_date,
            grace_deadline: renewing.then(|| subscription.grace_deadline(grace)),
            expires_at: cancelled.then_some(subscription.next_deduction_date),
            cost: subscription.cost,
            period: subscription.period,
            period_days: subscription.period_days,
            auto_renew: subscription.auto_renew,
            cancelled_at: subscription.cancelled_at,
            disabled_at: subscription.disabled_at,
            disable_reason: subscription.disable_reason,
        }
    }
}
