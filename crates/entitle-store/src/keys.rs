//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.
//! Snowflakes and timestamps are big-endian so lexicographic order is numeric order.

use chrono::{DateTime, Utc};

use entitle_core::{GuildId, SubscriptionKey, TransactionId, UserId};

/// Length of an encoded snowflake.
const SNOWFLAKE_LEN: usize = 8;

/// Length of an encoded timestamp.
const TIMESTAMP_LEN: usize = 8;

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: UserId) -> Vec<u8> {
    user_id.to_be_bytes().to_vec()
}

/// Create a subscription key.
///
/// Format: `guild_id (8 bytes) || feature_id (utf-8)`
#[must_use]
pub fn subscription_key(key: &SubscriptionKey) -> Vec<u8> {
    let feature = key.feature_id.as_str().as_bytes();
    let mut out = Vec::with_capacity(SNOWFLAKE_LEN + feature.len());
    out.extend_from_slice(&key.guild_id.to_be_bytes());
    out.extend_from_slice(feature);
    out
}

/// Create a prefix for iterating all subscriptions of a guild.
#[must_use]
pub fn guild_subscriptions_prefix(guild_id: GuildId) -> Vec<u8> {
    guild_id.to_be_bytes().to_vec()
}

/// Encode a timestamp so byte order matches time order, including before the epoch.
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> [u8; TIMESTAMP_LEN] {
    // Flip the sign bit so negative millis sort first
    #[allow(clippy::cast_sign_loss)]
    let ordered = (at.timestamp_millis() as u64) ^ (1 << 63);
    ordered.to_be_bytes()
}

/// Create a due-date index key.
///
/// Format: `next_deduction (8 bytes) || subscription key`
#[must_use]
pub fn due_index_key(next_deduction: DateTime<Utc>, key: &SubscriptionKey) -> Vec<u8> {
    let subscription = subscription_key(key);
    let mut out = Vec::with_capacity(TIMESTAMP_LEN + subscription.len());
    out.extend_from_slice(&encode_timestamp(next_deduction));
    out.extend_from_slice(&subscription);
    out
}

/// Whether a due-index key is due at or before `cutoff`.
#[must_use]
pub fn due_index_at_or_before(index_key: &[u8], cutoff: DateTime<Utc>) -> bool {
    index_key.len() >= TIMESTAMP_LEN && index_key[..TIMESTAMP_LEN] <= encode_timestamp(cutoff)[..]
}

/// Create a guild-transaction index key.
///
/// Format: `guild_id (8 bytes) || transaction_id (16 bytes)`
///
/// Since ULIDs are time-ordered, a guild's transactions are sorted by time.
#[must_use]
pub fn guild_transaction_key(guild_id: GuildId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(SNOWFLAKE_LEN + 16);
    key.extend_from_slice(&guild_id.to_be_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions of a guild.
#[must_use]
pub fn guild_transactions_prefix(guild_id: GuildId) -> Vec<u8> {
    guild_id.to_be_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Extract the transaction ID from a guild-transaction index key.
///
/// Returns `None` if the key is malformed.
#[must_use]
pub fn extract_transaction_id_from_guild_key(key: &[u8]) -> Option<TransactionId> {
    let bytes: [u8; 16] = key.get(SNOWFLAKE_LEN..SNOWFLAKE_LEN + 16)?.try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}
