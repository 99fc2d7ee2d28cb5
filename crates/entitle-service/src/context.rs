//! Engine wiring.
//!
//! Every collaborator is constructed explicitly and handed to the manager and sweeper
//! through an [`EngineContext`]; nothing is global.

use std::sync::Arc;

use rust_decimal::Decimal;

use entitle_core::{
    Clock, FeatureCatalog, FeatureId, SubscriptionKey, SystemClock, TransactionRecord, UserId,
};
use entitle_store::{CreditLedger, EntitlementStore, TransactionLog};

use crate::config::EngineConfig;
use crate::dedup::WarningCache;
use crate::hooks::{CommandSync, CommandVisibilityHook, HookRegistry, TracingCommandSync};
use crate::locks::KeyedLocks;
use crate::notify::{NotificationDispatcher, TracingDispatcher, WarningNotifier};
use crate::recorder::TransactionRecorder;

/// The three storage collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Credit balances.
    pub ledger: Arc<dyn CreditLedger>,
    /// Subscription records.
    pub store: Arc<dyn EntitlementStore>,
    /// Audit trail.
    pub log: Arc<dyn TransactionLog>,
}

impl Collaborators {
    /// Use one backend for all three contracts.
    #[must_use]
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: CreditLedger + EntitlementStore + TransactionLog + 'static,
    {
        Self {
            ledger: backend.clone(),
            store: backend.clone(),
            log: backend,
        }
    }
}

/// Shared state of the subscription manager and the renewal sweeper.
pub struct EngineContext {
    /// Configuration.
    pub config: EngineConfig,
    /// Feature catalog, immutable for the life of the process.
    pub catalog: Arc<FeatureCatalog>,
    /// Credit balances.
    pub ledger: Arc<dyn CreditLedger>,
    /// Subscription records.
    pub store: Arc<dyn EntitlementStore>,
    /// Audit trail writer.
    pub recorder: TransactionRecorder,
    /// Deduplicating notification front.
    pub notifier: WarningNotifier,
    /// Feature side effects.
    pub hooks: HookRegistry,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Per-subscription locks.
    pub locks: KeyedLocks<SubscriptionKey>,
}

impl EngineContext {
    /// Start building a context.
    #[must_use]
    pub fn builder(
        config: EngineConfig,
        catalog: FeatureCatalog,
        collaborators: Collaborators,
    ) -> EngineContextBuilder {
        EngineContextBuilder {
            config,
            catalog,
            collaborators,
            clock: Arc::new(SystemClock),
            dispatcher: Arc::new(TracingDispatcher),
            command_sync: Arc::new(TracingCommandSync),
            hooks: None,
        }
    }

    /// Grace period after a failed renewal.
    #[must_use]
    pub fn grace(&self) -> chrono::Duration {
        self.config.grace_period()
    }

    /// Low-balance warning horizon.
    #[must_use]
    pub fn horizon(&self) -> chrono::Duration {
        self.config.warning_horizon()
    }

    /// Give back a debit whose subscription write failed.
    ///
    /// Returns whether the credit was restored. A failed refund is logged at error level
    /// with everything needed to reconcile by hand.
    pub async fn refund(&self, key: &SubscriptionKey, user_id: UserId, amount: Decimal, cause: &str) -> bool {
        if amount <= Decimal::ZERO {
            return true;
        }

        match self.ledger.credit(user_id, amount).await {
            Ok(balance) => {
                tracing::warn!(
                    guild_id = %key.guild_id,
                    feature_id = %key.feature_id,
                    user_id = %user_id,
                    amount = %amount,
                    balance = %balance,
                    cause = %cause,
                    "Debit refunded after failed subscription write"
                );
                self.recorder
                    .record(TransactionRecord::refund(
                        key.guild_id,
                        user_id,
                        key.feature_id.clone(),
                        amount,
                        cause,
                        self.clock.now(),
                    ))
                    .await;
                true
            }
            Err(e) => {
                tracing::error!(
                    guild_id = %key.guild_id,
                    feature_id = %key.feature_id,
                    user_id = %user_id,
                    amount = %amount,
                    cause = %cause,
                    error = %e,
                    "Refund failed, credits must be reconciled manually"
                );
                false
            }
        }
    }
}

/// Builder for [`EngineContext`].
pub struct EngineContextBuilder {
    config: EngineConfig,
    catalog: FeatureCatalog,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    command_sync: Arc<dyn CommandSync>,
    hooks: Option<HookRegistry>,
}

impl EngineContextBuilder {
    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `dispatcher` instead of logging notifications.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Command sync used by the default pro-feature hook.
    #[must_use]
    pub fn command_sync(mut self, command_sync: Arc<dyn CommandSync>) -> Self {
        self.command_sync = command_sync;
        self
    }

    /// Replace the default hooks entirely.
    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Assemble the context.
    #[must_use]
    pub fn build(self) -> EngineContext {
        let hooks = self
            .hooks
            .unwrap_or_else(|| default_hooks(&self.config, &self.catalog, &self.command_sync));
        let cache = WarningCache::new(self.config.warning_ttl(), Arc::clone(&self.clock));

        EngineContext {
            catalog: Arc::new(self.catalog),
            ledger: self.collaborators.ledger,
            store: self.collaborators.store,
            recorder: TransactionRecorder::new(self.collaborators.log),
            notifier: WarningNotifier::new(self.dispatcher, cache),
            hooks,
            clock: self.clock,
            locks: KeyedLocks::new(),
            config: self.config,
        }
    }
}

/// Command visibility for the configured pro feature, when the catalog has it.
fn default_hooks(
    config: &EngineConfig,
    catalog: &FeatureCatalog,
    command_sync: &Arc<dyn CommandSync>,
) -> HookRegistry {
    let mut hooks = HookRegistry::new();
    let Ok(pro) = FeatureId::new(config.pro_feature_id.clone()) else {
        tracing::warn!("PRO_FEATURE_ID is empty, command visibility hook disabled");
        return hooks;
    };

    match catalog.by_id(&pro) {
        Some(definition) => {
            let hook = CommandVisibilityHook::new(definition, Arc::clone(command_sync));
            hooks.register(pro, Arc::new(hook));
        }
        None => {
            tracing::warn!(feature_id = %pro, "Pro feature not in catalog, command visibility hook disabled");
        }
    }
    hooks
}
