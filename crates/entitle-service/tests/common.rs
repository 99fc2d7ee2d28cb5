//! Common test utilities for entitlement integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use entitle_core::{
    Decimal, FeatureCatalog, FeatureId, GuildId, ManualClock, Subscription, SubscriptionKey,
    TransactionRecord, UserId,
};
use entitle_service::hooks::HookError;
use entitle_service::notify::{
    DeactivationNotice, GracePeriodWarning, LowBalanceWarning, NotifyError,
};
use entitle_service::{
    create_router, AppState, Collaborators, CommandSync, EngineConfig, EngineContext,
    NotificationDispatcher, RenewalSweeper, SubscriptionManager,
};
use entitle_store::{CreditLedger, EntitlementStore, MemoryStore, StoreError, TransactionLog};

pub const GUILD: GuildId = GuildId::new(1_000);
pub const OTHER_GUILD: GuildId = GuildId::new(2_000);
pub const PAYER: UserId = UserId::new(10);
pub const OTHER_USER: UserId = UserId::new(20);

pub const SERVICE_KEY: &str = "test-service-key";
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn pro() -> FeatureId {
    FeatureId::new("pro").unwrap()
}

pub fn analytics() -> FeatureId {
    FeatureId::new("analytics").unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn credits(amount: i64) -> Decimal {
    Decimal::from(amount)
}

// ============================================================================
// Recording fakes
// ============================================================================

/// Notification sent through the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    LowBalance(LowBalanceWarning),
    GracePeriod(GracePeriodWarning),
    Deactivation(DeactivationNotice),
}

/// Dispatcher that remembers every send.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn low_balance_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::LowBalance(_)))
            .count()
    }

    pub fn grace_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::GracePeriod(_)))
            .count()
    }

    pub fn deactivations(&self) -> Vec<DeactivationNotice> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Deactivation(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_low_balance_warning(&self, warning: &LowBalanceWarning) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::LowBalance(warning.clone()));
        Ok(())
    }

    async fn send_grace_period_warning(
        &self,
        warning: &GracePeriodWarning,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::GracePeriod(warning.clone()));
        Ok(())
    }

    async fn send_deactivation_notice(&self, notice: &DeactivationNotice) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::Deactivation(notice.clone()));
        Ok(())
    }
}

/// Command sync that remembers every override set pushed.
#[derive(Default)]
pub struct RecordingCommandSync {
    calls: Mutex<Vec<(GuildId, Vec<String>)>>,
}

impl RecordingCommandSync {
    pub fn calls(&self) -> Vec<(GuildId, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandSync for RecordingCommandSync {
    async fn sync_commands(&self, guild_id: GuildId, commands: &[String]) -> Result<(), HookError> {
        self.calls.lock().unwrap().push((guild_id, commands.to_vec()));
        Ok(())
    }
}

// ============================================================================
// Fault injection
// ============================================================================

/// Switches for [`FaultyBackend`].
#[derive(Default)]
pub struct Faults {
    /// Fail every subscription write.
    pub fail_puts: AtomicBool,
    /// Payers whose ledger calls fail.
    pub broken_payers: Mutex<HashSet<UserId>>,
    /// Hold debits until `release` is notified.
    pub hold_debits: AtomicBool,
    /// Notified when a held debit is waiting.
    pub entered: Notify,
    /// Notify to let a held debit through.
    pub release: Notify,
}

impl Faults {
    pub fn break_payer(&self, user_id: UserId) {
        self.broken_payers.lock().unwrap().insert(user_id);
    }

    fn check_payer(&self, user_id: UserId) -> entitle_store::Result<()> {
        if self.broken_payers.lock().unwrap().contains(&user_id) {
            return Err(StoreError::Database("ledger unreachable".into()));
        }
        Ok(())
    }
}

/// `MemoryStore` with switchable failures.
pub struct FaultyBackend {
    inner: Arc<MemoryStore>,
    faults: Arc<Faults>,
}

#[async_trait]
impl CreditLedger for FaultyBackend {
    async fn get_balance(&self, user_id: UserId) -> entitle_store::Result<Decimal> {
        self.faults.check_payer(user_id)?;
        self.inner.get_balance(user_id).await
    }

    async fn debit(&self, user_id: UserId, amount: Decimal) -> entitle_store::Result<Decimal> {
        self.faults.check_payer(user_id)?;
        if self.faults.hold_debits.load(Ordering::SeqCst) {
            self.faults.entered.notify_one();
            self.faults.release.notified().await;
        }
        self.inner.debit(user_id, amount).await
    }

    async fn credit(&self, user_id: UserId, amount: Decimal) -> entitle_store::Result<Decimal> {
        self.inner.credit(user_id, amount).await
    }
}

#[async_trait]
impl EntitlementStore for FaultyBackend {
    async fn get(&self, key: &SubscriptionKey) -> entitle_store::Result<Option<Subscription>> {
        self.inner.get(key).await
    }

    async fn list_by_guild(&self, guild_id: GuildId) -> entitle_store::Result<Vec<Subscription>> {
        EntitlementStore::list_by_guild(self.inner.as_ref(), guild_id).await
    }

    async fn put(
        &self,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> entitle_store::Result<Subscription> {
        if self.faults.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Database("write failed".into()));
        }
        self.inner.put(subscription, expected_version).await
    }

    async fn query_active(
        &self,
        due_before: Option<DateTime<Utc>>,
    ) -> entitle_store::Result<Vec<Subscription>> {
        self.inner.query_active(due_before).await
    }
}

// ============================================================================
// Engine harness
// ============================================================================

/// An engine over in-memory storage with a manual clock and recording fakes.
pub struct Engine {
    pub state: AppState,
    pub manager: SubscriptionManager,
    pub sweeper: Arc<RenewalSweeper>,
    pub ctx: Arc<EngineContext>,
    pub backend: Arc<MemoryStore>,
    pub faults: Arc<Faults>,
    pub clock: Arc<ManualClock>,
    pub notifications: Arc<RecordingDispatcher>,
    pub commands: Arc<RecordingCommandSync>,
}

impl Engine {
    /// Engine with the built-in catalog.
    pub fn new() -> Self {
        Self::with_catalog(FeatureCatalog::default())
    }

    /// Engine with a custom catalog.
    pub fn with_catalog(catalog: FeatureCatalog) -> Self {
        Self::build(catalog, Arc::new(MemoryStore::new()))
    }

    /// Engine over an existing backend, as after a restart.
    pub fn build(catalog: FeatureCatalog, backend: Arc<MemoryStore>) -> Self {
        let faults = Arc::new(Faults::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let notifications = Arc::new(RecordingDispatcher::default());
        let commands = Arc::new(RecordingCommandSync::default());

        let faulty = Arc::new(FaultyBackend {
            inner: Arc::clone(&backend),
            faults: Arc::clone(&faults),
        });
        let collaborators = Collaborators {
            ledger: faulty.clone(),
            store: faulty,
            log: backend.clone(),
        };

        let config = EngineConfig {
            service_api_key: Some(SERVICE_KEY.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            ..EngineConfig::default()
        };

        let ctx = Arc::new(
            EngineContext::builder(config, catalog, collaborators)
                .clock(clock.clone())
                .dispatcher(notifications.clone())
                .command_sync(commands.clone())
                .build(),
        );
        let state = AppState::new(Arc::clone(&ctx));

        Self {
            manager: state.manager.clone(),
            sweeper: Arc::clone(&state.sweeper),
            state,
            ctx,
            backend,
            faults,
            clock,
            notifications,
            commands,
        }
    }

    pub async fn fund(&self, user_id: UserId, amount: i64) {
        self.backend.credit(user_id, credits(amount)).await.unwrap();
    }

    pub async fn balance(&self, user_id: UserId) -> Decimal {
        self.backend.get_balance(user_id).await.unwrap()
    }

    pub async fn subscription(&self, guild_id: GuildId, feature_id: FeatureId) -> Option<Subscription> {
        self.backend
            .get(&SubscriptionKey::new(guild_id, feature_id))
            .await
            .unwrap()
    }

    pub async fn transactions(&self, guild_id: GuildId) -> Vec<TransactionRecord> {
        TransactionLog::list_by_guild(self.backend.as_ref(), guild_id, 100, 0)
            .await
            .unwrap()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(chrono::Duration::hours(hours));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HTTP harness
// ============================================================================

/// Test harness containing everything needed for HTTP integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The engine behind the server.
    pub engine: Engine,
    /// The service API key for bot requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with fresh in-memory storage.
    pub fn new() -> Self {
        let engine = Engine::new();
        let router: Router = create_router(engine.state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            engine,
            service_api_key: SERVICE_KEY.into(),
            admin_api_key: ADMIN_KEY.into(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
