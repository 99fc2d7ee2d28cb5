//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of every storage contract.
//! Read-modify-write operations (debits, compare-and-swap puts) run under a single
//! write lock and commit through one `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use rust_decimal::Decimal;

use entitle_core::{
    CreditAccount, GuildId, Subscription, SubscriptionKey, TransactionRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{ensure_positive, next_version, CreditLedger, EntitlementStore, TransactionLog};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_account(&self, user_id: UserId) -> Result<Option<CreditAccount>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn put_account(&self, account: &CreditAccount) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let value = Self::serialize(account)?;
        self.db
            .put_cf(&cf, keys::account_key(account.user_id), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_subscription(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::subscription_key(key))
    }

    /// Collect keys of a column family that start with `prefix`, in key order.
    fn keys_with_prefix(&self, family: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(family)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(key.to_vec());
        }
        Ok(out)
    }
}

#[async_trait]
impl CreditLedger for RocksStore {
    async fn get_balance(&self, user_id: UserId) -> Result<Decimal> {
        Ok(self
            .get_account(user_id)?
            .map_or(Decimal::ZERO, |a| a.balance))
    }

    async fn debit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        let _guard = self.lock_writes();

        let mut account = match self.get_account(user_id)? {
            Some(account) if account.has_sufficient_credits(amount) => account,
            other => {
                return Err(StoreError::InsufficientCredits {
                    balance: other.map_or(Decimal::ZERO, |a| a.balance),
                    required: amount,
                })
            }
        };

        account.balance -= amount;
        account.lifetime_spent += amount;
        account.updated_at = Utc::now();
        self.put_account(&account)?;

        Ok(account.balance)
    }

    async fn credit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        let _guard = self.lock_writes();

        let now = Utc::now();
        let mut account = self
            .get_account(user_id)?
            .unwrap_or_else(|| CreditAccount::new(user_id, now));
        account.balance += amount;
        account.updated_at = now;
        self.put_account(&account)?;

        Ok(account.balance)
    }
}

#[async_trait]
impl EntitlementStore for RocksStore {
    async fn get(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        self.get_subscription(key)
    }

    async fn list_by_guild(&self, guild_id: GuildId) -> Result<Vec<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let prefix = keys::guild_subscriptions_prefix(guild_id);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut subscriptions = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            subscriptions.push(Self::deserialize(&value)?);
        }
        Ok(subscriptions)
    }

    async fn put(
        &self,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<Subscription> {
        let _guard = self.lock_writes();
        let key = subscription.key();
        let current = self.get_subscription(&key)?;
        let version = next_version(expected_version, current.as_ref().map(|s| s.version))?;

        let mut stored = subscription.clone();
        stored.version = version;

        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_due = self.cf(cf::ACTIVE_BY_DUE)?;
        let sub_key = keys::subscription_key(&key);
        let value = Self::serialize(&stored)?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = current.filter(|s| s.active) {
            batch.delete_cf(&cf_due, keys::due_index_key(previous.next_deduction_date, &key));
        }
        batch.put_cf(&cf_subs, &sub_key, &value);
        if stored.active {
            batch.put_cf(
                &cf_due,
                keys::due_index_key(stored.next_deduction_date, &key),
                &sub_key,
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(stored)
    }

    async fn query_active(&self, due_before: Option<DateTime<Utc>>) -> Result<Vec<Subscription>> {
        let cf_due = self.cf(cf::ACTIVE_BY_DUE)?;
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;

        let mut subscriptions = Vec::new();
        for item in self.db.iterator_cf(&cf_due, IteratorMode::Start) {
            let (index_key, sub_key) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if let Some(cutoff) = due_before {
                if !keys::due_index_at_or_before(&index_key, cutoff) {
                    break;
                }
            }

            let data = self
                .db
                .get_cf(&cf_subs, &sub_key)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            match data {
                Some(data) => subscriptions.push(Self::deserialize(&data)?),
                None => tracing::warn!("Due index entry points at a missing subscription"),
            }
        }

        Ok(subscriptions)
    }
}

#[async_trait]
impl TransactionLog for RocksStore {
    async fn append(&self, record: &TransactionRecord) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_guild = self.cf(cf::TRANSACTIONS_BY_GUILD)?;

        let tx_key = keys::transaction_key(&record.id);
        let guild_tx_key = keys::guild_transaction_key(record.guild_id, &record.id);
        let value = Self::serialize(record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_tx, &tx_key, &value);
        batch.put_cf(&cf_by_guild, &guild_tx_key, []); // Index entry (empty value)

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn list_by_guild(
        &self,
        guild_id: GuildId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let prefix = keys::guild_transactions_prefix(guild_id);
        let mut all_keys = self.keys_with_prefix(cf::TRANSACTIONS_BY_GUILD, &prefix)?;

        // ULIDs are time-ordered; reverse for newest first
        all_keys.reverse();

        let mut records = Vec::new();
        for key in all_keys.into_iter().skip(offset).take(limit) {
            let Some(tx_id) = keys::extract_transaction_id_from_guild_key(&key) else {
                tracing::warn!(guild_id = %guild_id, "Malformed transaction index key");
                continue;
            };
            if let Some(record) = self.get_value(cf::TRANSACTIONS, &keys::transaction_key(&tx_id))? {
                records.push(record);
            }
        }

        Ok(records)
    }
}
