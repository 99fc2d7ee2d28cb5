//! Storage layer for the guild entitlement engine.
//!
//! This crate defines the collaborator contracts the engine talks to and ships two
//! implementations of all of them:
//!
//! - [`MemoryStore`]: process-local maps, for tests and development
//! - [`RocksStore`]: `RocksDB` with column families and CBOR values
//!
//! # Contracts
//!
//! - [`CreditLedger`]: per-user balances with an atomic debit
//! - [`EntitlementStore`]: one independently versioned record per (guild, feature)
//! - [`TransactionLog`]: append-only audit trail
//!
//! # Example
//!
//! ```no_run
//! use entitle_core::{Decimal, UserId};
//! use entitle_store::{CreditLedger, MemoryStore};
//!
//! # async fn run() -> entitle_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = UserId::new(42);
//! store.credit(user, Decimal::from(100)).await?;
//! let balance = store.debit(user, Decimal::from(30)).await?;
//! assert_eq!(balance, Decimal::from(70));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use entitle_core::{GuildId, Subscription, SubscriptionKey, TransactionRecord, UserId};

/// Per-user credit balances.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. Users without an account have a zero balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    async fn get_balance(&self, user_id: UserId) -> Result<Decimal>;

    /// Remove `amount` from the balance, returning the new balance.
    ///
    /// Atomic with respect to other debits for the same user; never leaves a negative balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientCredits` if the balance is too low (nothing is changed).
    /// - `StoreError::InvalidAmount` if `amount` is not positive.
    async fn debit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal>;

    /// Add `amount` to the balance, creating the account if needed.
    ///
    /// Used for top-ups and for compensating refunds.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidAmount` if `amount` is not positive.
    async fn credit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal>;
}

/// Subscription records, one per (guild, feature).
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Get one subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get(&self, key: &SubscriptionKey) -> Result<Option<Subscription>>;

    /// All subscriptions of a guild, active or not, ordered by feature id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_by_guild(&self, guild_id: GuildId) -> Result<Vec<Subscription>>;

    /// Compare-and-swap write.
    ///
    /// `expected_version` is the version the caller read (`None` if the record did not
    /// exist). Returns the stored record with its new version.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::VersionConflict` if another writer got there first.
    async fn put(
        &self,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<Subscription>;

    /// Active subscriptions, optionally only those due at or before `due_before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn query_active(&self, due_before: Option<DateTime<Utc>>) -> Result<Vec<Subscription>>;
}

/// Append-only audit trail.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Append a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append(&self, record: &TransactionRecord) -> Result<()>;

    /// A guild's records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_by_guild(
        &self,
        guild_id: GuildId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRecord>>;
}

/// Next version for a compare-and-swap write, or the conflict if `expected` is stale.
pub(crate) fn next_version(expected: Option<u64>, found: Option<u64>) -> Result<u64> {
    if expected != found {
        return Err(StoreError::VersionConflict { expected, found });
    }
    Ok(found.map_or(1, |v| v + 1))
}

pub(crate) fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount(amount));
    }
    Ok(())
}
