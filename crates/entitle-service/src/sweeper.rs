//! Periodic renewal reconciliation.
//!
//! A tick loads active subscriptions and evaluates each one independently under its
//! `(guild, feature)` lock, re-reading the record first so a concurrent activation or
//! cancellation is never overwritten. A failure on one subscription is logged and the
//! sweep moves on.
//!
//! Ticks never overlap: a tick that finds another still running returns
//! [`SweepError::AlreadyRunning`] without doing anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use entitle_core::{
    DisableReason, FeatureDefinition, Subscription, SubscriptionKey, TransactionRecord,
};
use entitle_store::StoreError;

use crate::context::EngineContext;
use crate::notify::{DeactivationNotice, GracePeriodWarning, LowBalanceWarning};

/// Sweep-level failure.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// A previous tick is still in progress.
    #[error("a sweep is already running")]
    AlreadyRunning,

    /// The active subscriptions could not be loaded.
    #[error("failed to load active subscriptions: {0}")]
    Store(#[from] StoreError),
}

/// What a tick did to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Record vanished or was already disabled when re-read.
    Skipped,
    /// Nothing to do yet.
    Untouched,
    /// Renewal upcoming and underfunded; a low-balance warning was sent.
    Warned,
    /// Renewal debited; next cycle scheduled.
    Renewed,
    /// Renewal failed inside the grace period; `warned` if a warning was sent this tick.
    InGrace {
        /// Whether a grace warning was sent.
        warned: bool,
    },
    /// Subscription disabled.
    Disabled(DisableReason),
}

/// Counts of one sweep tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Whether every active subscription was loaded rather than only due ones.
    pub full_scan: bool,
    /// Subscriptions evaluated.
    pub examined: usize,
    /// Renewals debited.
    pub renewed: usize,
    /// Subscriptions disabled.
    pub disabled: usize,
    /// Warnings sent (low balance and grace period).
    pub warned: usize,
    /// Subscriptions left active in their grace period.
    pub in_grace: usize,
    /// Subscriptions whose evaluation failed.
    pub failed: usize,
}

impl SweepReport {
    fn tally(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Skipped | SweepOutcome::Untouched => {}
            SweepOutcome::Warned => self.warned += 1,
            SweepOutcome::Renewed => self.renewed += 1,
            SweepOutcome::InGrace { warned } => {
                self.in_grace += 1;
                if warned {
                    self.warned += 1;
                }
            }
            SweepOutcome::Disabled(_) => self.disabled += 1,
        }
    }
}

struct SweeperTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Clears the running flag when a tick ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Timer-driven renewal loop.
pub struct RenewalSweeper {
    ctx: Arc<EngineContext>,
    running: AtomicBool,
    /// Set once a full scan completes without failures.
    scanned_all: AtomicBool,
    task: Mutex<Option<SweeperTask>>,
}

impl RenewalSweeper {
    /// Create a stopped sweeper.
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            running: AtomicBool::new(false),
            scanned_all: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Whether the timer task is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the timer task. The first tick fires immediately.
    ///
    /// Calling `start` on a started sweeper does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            tracing::warn!("Renewal sweeper already started");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let sweeper = Arc::clone(self);
        let period = self.ctx.config.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sweeper.run_once().await {
                            Ok(_) => {}
                            Err(SweepError::AlreadyRunning) => {
                                tracing::debug!("Previous sweep still running, tick skipped");
                            }
                            Err(e) => tracing::warn!(error = %e, "Sweep tick failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Renewal sweeper stopped");
        });

        tracing::info!(interval_secs = period.as_secs(), "Renewal sweeper started");
        *task = Some(SweeperTask { shutdown, handle });
    }

    /// Stop the timer task, letting an in-flight tick finish first.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        // The receiver may already be gone if the task panicked
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "Renewal sweeper task failed");
        }
    }

    /// Run one sweep tick now.
    ///
    /// # Errors
    ///
    /// - `SweepError::AlreadyRunning` if another tick is in progress.
    /// - `SweepError::Store` if the active subscriptions cannot be loaded.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SweepError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let now = self.ctx.clock.now();
        let full_scan = !self.scanned_all.load(Ordering::Acquire);
        let due_before = (!full_scan).then(|| now + self.ctx.horizon());

        let subscriptions = self.ctx.store.query_active(due_before).await?;

        let mut report = SweepReport {
            full_scan,
            ..SweepReport::default()
        };
        for subscription in subscriptions {
            let key = subscription.key();
            report.examined += 1;
            match self.evaluate(&key, now).await {
                Ok(outcome) => report.tally(outcome),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        guild_id = %key.guild_id,
                        feature_id = %key.feature_id,
                        error = %e,
                        "Failed to evaluate subscription, continuing sweep"
                    );
                }
            }
        }

        // Records that failed a full scan may not be due for weeks
        if full_scan && report.failed == 0 {
            self.scanned_all.store(true, Ordering::Release);
        }

        tracing::info!(
            full_scan = report.full_scan,
            examined = report.examined,
            renewed = report.renewed,
            disabled = report.disabled,
            warned = report.warned,
            in_grace = report.in_grace,
            failed = report.failed,
            "Sweep completed"
        );
        Ok(report)
    }

    /// Evaluate one subscription at `now`.
    async fn evaluate(
        &self,
        key: &SubscriptionKey,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let _guard = self.ctx.locks.lock(key).await;

        let Some(subscription) = self.ctx.store.get(key).await?.filter(|s| s.active) else {
            return Ok(SweepOutcome::Skipped);
        };

        let Some(feature) = self.ctx.catalog.by_id(&subscription.feature_id) else {
            return self
                .disable(subscription, DisableReason::FeatureRemoved, now)
                .await;
        };

        if subscription.is_cancelled() {
            if subscription.is_due(now) {
                return self.disable(subscription, DisableReason::Cancelled, now).await;
            }
            return Ok(SweepOutcome::Untouched);
        }

        let mut warned = false;
        if subscription.within_warning_horizon(now, self.ctx.horizon()) {
            let balance = self.ctx.ledger.get_balance(subscription.payer_user_id).await?;
            if balance < feature.cost {
                warned = self
                    .ctx
                    .notifier
                    .warn_low_balance(&LowBalanceWarning {
                        guild_id: subscription.guild_id,
                        feature_id: subscription.feature_id.clone(),
                        feature_name: feature.name.clone(),
                        user_id: subscription.payer_user_id,
                        cost: feature.cost,
                        balance,
                        due_at: subscription.next_deduction_date,
                    })
                    .await;
            }
        }

        if !subscription.is_due(now) {
            return Ok(if warned {
                SweepOutcome::Warned
            } else {
                SweepOutcome::Untouched
            });
        }

        self.renew(subscription, feature, now).await
    }

    /// Attempt the renewal debit of a due, auto-renewing subscription.
    async fn renew(
        &self,
        mut subscription: Subscription,
        feature: &FeatureDefinition,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let payer = subscription.payer_user_id;
        let key = subscription.key();

        let debit = if feature.cost > Decimal::ZERO {
            self.ctx.ledger.debit(payer, feature.cost).await
        } else {
            self.ctx.ledger.get_balance(payer).await
        };

        let balance = match debit {
            Ok(balance) => balance,
            Err(StoreError::InsufficientCredits { balance, .. }) => {
                return self.underfunded(subscription, feature, balance, now).await;
            }
            Err(e) => return Err(e),
        };

        let version = subscription.version;
        subscription.renew(feature, now);
        if let Err(e) = self.ctx.store.put(&subscription, Some(version)).await {
            self.ctx
                .refund(&key, payer, feature.cost, "renewal write failed")
                .await;
            return Err(e);
        }

        self.ctx
            .recorder
            .record(TransactionRecord::renewal(
                subscription.guild_id,
                payer,
                subscription.feature_id.clone(),
                feature.cost,
                subscription.next_deduction_date,
                now,
            ))
            .await;
        self.ctx
            .notifier
            .clear(subscription.guild_id, &subscription.feature_id);

        tracing::info!(
            guild_id = %subscription.guild_id,
            feature_id = %subscription.feature_id,
            user_id = %payer,
            cost = %feature.cost,
            balance = %balance,
            next_deduction_date = %subscription.next_deduction_date,
            "Subscription renewed"
        );
        Ok(SweepOutcome::Renewed)
    }

    /// A due renewal the payer could not afford: grace warning or disablement.
    async fn underfunded(
        &self,
        subscription: Subscription,
        feature: &FeatureDefinition,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let grace_deadline = subscription.grace_deadline(self.ctx.grace());
        if now >= grace_deadline {
            return self
                .disable(subscription, DisableReason::InsufficientBalance, now)
                .await;
        }

        tracing::info!(
            guild_id = %subscription.guild_id,
            feature_id = %subscription.feature_id,
            user_id = %subscription.payer_user_id,
            balance = %balance,
            cost = %feature.cost,
            grace_deadline = %grace_deadline,
            "Renewal failed, subscription in grace period"
        );

        let warned = self
            .ctx
            .notifier
            .warn_grace_period(&GracePeriodWarning {
                guild_id: subscription.guild_id,
                feature_id: subscription.feature_id.clone(),
                feature_name: feature.name.clone(),
                user_id: subscription.payer_user_id,
                cost: feature.cost,
                balance,
                grace_deadline,
            })
            .await;
        Ok(SweepOutcome::InGrace { warned })
    }

    /// Disable, record, notify the payer and run the feature's disable hook.
    async fn disable(
        &self,
        mut subscription: Subscription,
        reason: DisableReason,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let version = subscription.version;
        subscription.disable(reason, now);
        self.ctx.store.put(&subscription, Some(version)).await?;

        let guild_id = subscription.guild_id;
        let feature_id = &subscription.feature_id;
        let payer = subscription.payer_user_id;

        self.ctx
            .recorder
            .record(TransactionRecord::disabled(
                guild_id,
                payer,
                feature_id.clone(),
                reason,
                now,
            ))
            .await;
        self.ctx.notifier.clear(guild_id, feature_id);
        self.ctx
            .notifier
            .notify_deactivation(&DeactivationNotice {
                guild_id,
                feature_id: feature_id.clone(),
                user_id: payer,
                reason,
            })
            .await;
        self.ctx.hooks.disabled(guild_id, feature_id).await;

        tracing::info!(
            guild_id = %guild_id,
            feature_id = %feature_id,
            user_id = %payer,
            reason = %reason,
            "Subscription disabled"
        );
        Ok(SweepOutcome::Disabled(reason))
    }
}
