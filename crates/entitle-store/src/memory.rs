//! In-memory storage implementation.
//!
//! All three contracts share one mutex, so every operation is trivially atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use entitle_core::{
    CreditAccount, GuildId, Subscription, SubscriptionKey, TransactionRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::{ensure_positive, next_version, CreditLedger, EntitlementStore, TransactionLog};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<UserId, CreditAccount>,
    subscriptions: BTreeMap<SubscriptionKey, Subscription>,
    transactions: Vec<TransactionRecord>,
}

/// Process-local implementation of every storage contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of audit records held.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn get_balance(&self, user_id: UserId) -> Result<Decimal> {
        Ok(self
            .state()
            .accounts
            .get(&user_id)
            .map_or(Decimal::ZERO, |a| a.balance))
    }

    async fn debit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        let mut state = self.state();
        let balance = state
            .accounts
            .get(&user_id)
            .map_or(Decimal::ZERO, |a| a.balance);
        if balance < amount {
            return Err(StoreError::InsufficientCredits {
                balance,
                required: amount,
            });
        }

        // A positive debit that passed the check implies the account exists
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound)?;
        account.balance -= amount;
        account.lifetime_spent += amount;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    async fn credit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        let now = Utc::now();
        let mut state = self.state();
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::new(user_id, now));
        account.balance += amount;
        account.updated_at = now;
        Ok(account.balance)
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn get(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        Ok(self.state().subscriptions.get(key).cloned())
    }

    async fn list_by_guild(&self, guild_id: GuildId) -> Result<Vec<Subscription>> {
        Ok(self
            .state()
            .subscriptions
            .values()
            .filter(|s| s.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn put(
        &self,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<Subscription> {
        let key = subscription.key();
        let mut state = self.state();
        let found = state.subscriptions.get(&key).map(|s| s.version);
        let version = next_version(expected_version, found)?;

        let mut stored = subscription.clone();
        stored.version = version;
        state.subscriptions.insert(key, stored.clone());
        Ok(stored)
    }

    async fn query_active(&self, due_before: Option<DateTime<Utc>>) -> Result<Vec<Subscription>> {
        let mut active: Vec<_> = self
            .state()
            .subscriptions
            .values()
            .filter(|s| s.active)
            .filter(|s| due_before.map_or(true, |cutoff| s.next_deduction_date <= cutoff))
            .cloned()
            .collect();
        active.sort_by_key(|s| s.next_deduction_date);
        Ok(active)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn append(&self, record: &TransactionRecord) -> Result<()> {
        self.state().transactions.push(record.clone());
        Ok(())
    }

    async fn list_by_guild(
        &self,
        guild_id: GuildId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .state()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.guild_id == guild_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use entitle_core::{FeatureCatalog, FeatureId};

    fn subscription(guild: u64, feature: &str, now: DateTime<Utc>) -> Subscription {
        let catalog = FeatureCatalog::default();
        let definition = catalog.by_id(&FeatureId::new(feature).unwrap()).unwrap();
        Subscription::activate(GuildId::new(guild), definition, UserId::new(9), now)
    }

    #[tokio::test]
    async fn debit_is_refused_without_mutation() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        store.credit(user, Decimal::from(40)).await.unwrap();

        let result = store.debit(user, Decimal::from(50)).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits { balance, required })
                if balance == Decimal::from(40) && required == Decimal::from(50)
        ));
        assert_eq!(store.get_balance(user).await.unwrap(), Decimal::from(40));

        let balance = store.debit(user, Decimal::from(40)).await.unwrap();
        assert_eq!(balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_user_has_zero_balance() {
        let store = MemoryStore::new();
        assert_eq!(store.get_balance(UserId::new(5)).await.unwrap(), Decimal::ZERO);
        assert!(matches!(
            store.debit(UserId::new(5), Decimal::ONE).await,
            Err(StoreError::InsufficientCredits { .. })
        ));
        assert!(matches!(
            store.credit(UserId::new(5), Decimal::ZERO).await,
            Err(StoreError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn put_is_compare_and_swap() {
        let store = MemoryStore::new();
        let sub = subscription(1, "pro", Utc::now());

        let stored = store.put(&sub, None).await.unwrap();
        assert_eq!(stored.version, 1);

        // A second creator loses
        assert!(matches!(
            store.put(&sub, None).await,
            Err(StoreError::VersionConflict {
                expected: None,
                found: Some(1)
            })
        ));

        let updated = store.put(&stored, Some(1)).await.unwrap();
        assert_eq!(updated.version, 2);

        // A writer holding the stale version loses
        assert!(matches!(
            store.put(&stored, Some(1)).await,
            Err(StoreError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn query_active_filters_by_due_date() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let soon = subscription(1, "pro", now - Duration::days(29));
        let later = subscription(2, "pro", now);
        let mut disabled = subscription(3, "pro", now - Duration::days(40));
        disabled.disable(entitle_core::DisableReason::Cancelled, now);

        store.put(&soon, None).await.unwrap();
        store.put(&later, None).await.unwrap();
        store.put(&disabled, None).await.unwrap();

        let due = store
            .query_active(Some(now + Duration::days(3)))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].guild_id, GuildId::new(1));

        let all = store.query_active(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn list_by_guild_is_isolated() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put(&subscription(1, "pro", now), None).await.unwrap();
        store.put(&subscription(1, "analytics", now), None).await.unwrap();
        store.put(&subscription(2, "pro", now), None).await.unwrap();

        let guild_one = EntitlementStore::list_by_guild(&store, GuildId::new(1))
            .await
            .unwrap();
        assert_eq!(guild_one.len(), 2);
    }

    #[tokio::test]
    async fn transactions_newest_first() {
        let store = MemoryStore::new();
        let guild = GuildId::new(1);
        let feature = FeatureId::new("pro").unwrap();
        let now = Utc::now();

        for days in 0..3 {
            let tx = TransactionRecord::cancellation(
                guild,
                UserId::new(2),
                feature.clone(),
                now + Duration::days(days),
                now + Duration::days(days),
            );
            store.append(&tx).await.unwrap();
        }

        let page = TransactionLog::list_by_guild(&store, guild, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].timestamp > page[1].timestamp);

        let rest = TransactionLog::list_by_guild(&store, guild, 10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
    }
}
