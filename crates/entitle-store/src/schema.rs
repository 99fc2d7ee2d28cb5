//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Credit accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Subscription records, keyed by `guild_id || feature_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Index: active subscriptions by due date, keyed by `next_deduction || guild_id || feature_id`.
    /// Value is the subscription key.
    pub const ACTIVE_BY_DUE: &str = "active_by_due";

    /// Audit records, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: audit records by guild, keyed by `guild_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_GUILD: &str = "transactions_by_guild";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::SUBSCRIPTIONS,
        cf::ACTIVE_BY_DUE,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_GUILD,
    ]
}
