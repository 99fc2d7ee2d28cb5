//! Error types for entitlement storage.

use rust_decimal::Decimal;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Insufficient credits for a debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// A compare-and-swap write lost a race.
    #[error("version conflict: expected={expected:?}, found={found:?}")]
    VersionConflict {
        /// Version the writer based its change on (`None` = record must not exist).
        expected: Option<u64>,
        /// Version currently stored.
        found: Option<u64>,
    },

    /// Zero or negative amount passed to the ledger.
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
}
