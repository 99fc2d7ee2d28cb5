//! Audit trail records.
//!
//! Every credit movement tied to a subscription event produces a [`TransactionRecord`].
//! Records are append-only and use ULIDs so a guild's history sorts chronologically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::subscription::DisableReason;
use crate::{FeatureId, GuildId, TransactionId, UserId};

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// Guild the event belongs to.
    pub guild_id: GuildId,

    /// User whose credits moved (or who triggered the event).
    pub user_id: UserId,

    /// Feature the event belongs to.
    pub feature_id: FeatureId,

    /// What happened.
    pub kind: TransactionKind,

    /// Negative for a debit, positive for a refund, zero for non-monetary events.
    pub amount: Decimal,

    /// When it happened.
    pub timestamp: DateTime<Utc>,

    /// Free-form context.
    pub metadata: serde_json::Value,
}

impl TransactionRecord {
    fn new(
        kind: TransactionKind,
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            guild_id,
            user_id,
            feature_id,
            kind,
            amount,
            timestamp,
            metadata,
        }
    }

    /// Initial debit for a new billing cycle.
    #[must_use]
    pub fn activation(
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        cost: Decimal,
        next_deduction_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            TransactionKind::Activation,
            guild_id,
            user_id,
            feature_id,
            -cost.abs(), // Always negative for debits
            timestamp,
            serde_json::json!({ "next_deduction_date": next_deduction_date }),
        )
    }

    /// Periodic renewal debit.
    #[must_use]
    pub fn renewal(
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        cost: Decimal,
        next_deduction_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            TransactionKind::Renewal,
            guild_id,
            user_id,
            feature_id,
            -cost.abs(),
            timestamp,
            serde_json::json!({ "next_deduction_date": next_deduction_date }),
        )
    }

    /// Cancellation of auto-renewal.
    #[must_use]
    pub fn cancellation(
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            TransactionKind::Cancellation,
            guild_id,
            user_id,
            feature_id,
            Decimal::ZERO,
            timestamp,
            serde_json::json!({ "expires_at": expires_at }),
        )
    }

    /// Automatic disablement.
    #[must_use]
    pub fn disabled(
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        reason: DisableReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            TransactionKind::Disabled,
            guild_id,
            user_id,
            feature_id,
            Decimal::ZERO,
            timestamp,
            serde_json::json!({ "reason": reason }),
        )
    }

    /// Compensating credit for a debit whose subscription write failed.
    #[must_use]
    pub fn refund(
        guild_id: GuildId,
        user_id: UserId,
        feature_id: FeatureId,
        amount: Decimal,
        cause: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            TransactionKind::Refund,
            guild_id,
            user_id,
            feature_id,
            amount.abs(),
            timestamp,
            serde_json::json!({ "cause": cause }),
        )
    }
}

/// Kind of audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// First debit of an activation.
    Activation,
    /// Debit for a renewed period.
    Renewal,
    /// Payer cancelled auto-renewal.
    Cancellation,
    /// Subscription was disabled.
    Disabled,
    /// Compensating credit after a failed write.
    Refund,
}

impl TransactionKind {
    /// Check if this kind removes credits.
    #[must_use]
    pub const fn is_debit(self) -> bool {
        matches!(self, Self::Activation | Self::Renewal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pro() -> FeatureId {
        FeatureId::new("pro").unwrap()
    }

    #[test]
    fn debits_are_negative() {
        let now = Utc::now();
        let tx = TransactionRecord::activation(
            GuildId::new(1),
            UserId::new(2),
            pro(),
            Decimal::from(50),
            now,
            now,
        );
        assert_eq!(tx.amount, Decimal::from(-50));
        assert!(tx.kind.is_debit());

        let renewal = TransactionRecord::renewal(
            GuildId::new(1),
            UserId::new(2),
            pro(),
            Decimal::from(-50),
            now,
            now,
        );
        assert_eq!(renewal.amount, Decimal::from(-50));
    }

    #[test]
    fn non_monetary_events_are_zero() {
        let now = Utc::now();
        let tx = TransactionRecord::disabled(
            GuildId::new(1),
            UserId::new(2),
            pro(),
            DisableReason::InsufficientBalance,
            now,
        );
        assert_eq!(tx.amount, Decimal::ZERO);
        assert_eq!(tx.metadata["reason"], "insufficient_balance");
        assert!(!tx.kind.is_debit());
    }

    #[test]
    fn refund_is_positive() {
        let tx = TransactionRecord::refund(
            GuildId::new(1),
            UserId::new(2),
            pro(),
            Decimal::from(-50),
            "store write failed",
            Utc::now(),
        );
        assert_eq!(tx.amount, Decimal::from(50));
        assert_eq!(tx.kind, TransactionKind::Refund);
    }
}
