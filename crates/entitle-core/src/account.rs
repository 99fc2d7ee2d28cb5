//! Credit account types.
//!
//! A credit account is the per-user prepaid balance that guild features are paid from.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user's prepaid credit balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    /// The owning user.
    pub user_id: UserId,

    /// Current balance. Never negative.
    pub balance: Decimal,

    /// Lifetime credits spent on features.
    pub lifetime_spent: Decimal,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            lifetime_spent: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a debit of `amount`.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
