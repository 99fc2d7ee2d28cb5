//! Renewal sweeper tests: renewals, grace periods, warnings and disablement.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{
    analytics, credits, pro, start_time, Engine, GUILD, OTHER_GUILD, OTHER_USER, PAYER,
};
use entitle_core::{
    BillingPeriod, DisableReason, FeatureCatalog, FeatureDefinition, FeatureId, TransactionKind,
};
use entitle_service::SweepError;

fn kinds(txs: &[entitle_core::TransactionRecord]) -> Vec<TransactionKind> {
    // Oldest first reads more naturally in assertions
    txs.iter().rev().map(|t| t.kind).collect()
}

// ============================================================================
// Renewal
// ============================================================================

#[tokio::test]
async fn due_subscription_renews_exactly_once() {
    let engine = Engine::new();
    engine.fund(PAYER, 110).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    let before = engine.subscription(GUILD, pro()).await.unwrap();

    engine.advance_days(30);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.renewed, 1);
    assert_eq!(report.disabled, 0);

    let after = engine.subscription(GUILD, pro()).await.unwrap();
    assert_eq!(
        after.next_deduction_date,
        before.next_deduction_date + Duration::days(30)
    );
    assert_eq!(after.last_deduction_date, start_time() + Duration::days(30));
    assert_eq!(engine.balance(PAYER).await, credits(10));

    // A second tick in the same cycle does nothing
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.renewed, 0);
    assert_eq!(engine.balance(PAYER).await, credits(10));

    let txs = engine.transactions(GUILD).await;
    assert_eq!(
        kinds(&txs),
        vec![TransactionKind::Activation, TransactionKind::Renewal]
    );
    assert_eq!(txs[0].amount, credits(-50));
}

#[tokio::test]
async fn top_up_during_grace_renews_from_original_due_date() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(31);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.in_grace, 1);

    engine.fund(PAYER, 50).await;
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.renewed, 1);

    let sub = engine.subscription(GUILD, pro()).await.unwrap();
    assert_eq!(sub.next_deduction_date, start_time() + Duration::days(60));
    assert_eq!(engine.balance(PAYER).await, credits(0));
}

#[tokio::test]
async fn failed_renewal_write_refunds_and_retries_next_tick() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(30);
    engine.faults.fail_puts.store(true, Ordering::SeqCst);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.renewed, 0);
    assert_eq!(engine.balance(PAYER).await, credits(50));
    assert!(kinds(&engine.transactions(GUILD).await).contains(&TransactionKind::Refund));

    engine.faults.fail_puts.store(false, Ordering::SeqCst);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.renewed, 1);
    assert_eq!(engine.balance(PAYER).await, credits(0));
}

// ============================================================================
// Warnings and grace
// ============================================================================

#[tokio::test]
async fn low_balance_warning_is_sent_once() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(28);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.warned, 1);

    engine.advance_hours(6);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.warned, 0);
    assert_eq!(engine.notifications.low_balance_count(), 1);
    assert!(engine.subscription(GUILD, pro()).await.unwrap().active);
}

#[tokio::test]
async fn each_warning_is_sent_once_per_cycle_at_default_interval() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    // Every 6h tick through the three-day horizon
    engine.advance_days(27);
    engine.advance_hours(1);
    for _ in 0..12 {
        engine.sweeper.run_once().await.unwrap();
        engine.advance_hours(6);
    }
    assert_eq!(engine.notifications.low_balance_count(), 1);
    assert_eq!(engine.notifications.grace_count(), 0);

    // And through the three-day grace period
    for _ in 0..12 {
        let report = engine.sweeper.run_once().await.unwrap();
        assert_eq!(report.disabled, 0);
        engine.advance_hours(6);
    }
    assert_eq!(engine.notifications.grace_count(), 1);
    assert_eq!(engine.notifications.low_balance_count(), 1);

    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.disabled, 1);
}

#[tokio::test]
async fn funded_payer_is_not_warned() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(28);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.warned, 0);
    assert!(engine.notifications.sent().is_empty());
}

#[tokio::test]
async fn renewal_resets_warnings_for_the_next_cycle() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(28);
    engine.sweeper.run_once().await.unwrap();
    assert_eq!(engine.notifications.low_balance_count(), 1);

    engine.fund(PAYER, 50).await;
    engine.advance_days(2);
    assert_eq!(engine.sweeper.run_once().await.unwrap().renewed, 1);

    engine.advance_days(28);
    engine.sweeper.run_once().await.unwrap();
    assert_eq!(engine.notifications.low_balance_count(), 2);
}

#[tokio::test]
async fn underfunded_renewal_enters_grace_with_one_warning() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(30);
    engine.advance_hours(1);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.in_grace, 1);
    assert_eq!(report.warned, 1);
    assert_eq!(report.disabled, 0);

    let sub = engine.subscription(GUILD, pro()).await.unwrap();
    assert!(sub.active);
    assert!(engine.manager.is_feature_active(GUILD, &pro()).await.unwrap());

    engine.advance_hours(12);
    engine.sweeper.run_once().await.unwrap();
    assert_eq!(engine.notifications.grace_count(), 1);
    assert_eq!(engine.notifications.low_balance_count(), 0);
    assert_eq!(
        kinds(&engine.transactions(GUILD).await),
        vec![TransactionKind::Activation]
    );
}

#[tokio::test]
async fn underfunded_subscription_is_disabled_after_grace() {
    let engine = Engine::new();
    engine.fund(PAYER, 50).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(30);
    engine.advance_hours(1);
    engine.sweeper.run_once().await.unwrap();

    engine.advance_days(3);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.disabled, 1);
    assert_eq!(report.in_grace, 0);

    let sub = engine.subscription(GUILD, pro()).await.unwrap();
    assert!(!sub.active);
    assert_eq!(sub.disable_reason, Some(DisableReason::InsufficientBalance));
    assert!(!engine.manager.is_feature_active(GUILD, &pro()).await.unwrap());

    let txs = engine.transactions(GUILD).await;
    assert_eq!(txs[0].kind, TransactionKind::Disabled);
    assert_eq!(txs[0].amount, credits(0));
    assert_eq!(txs[0].user_id, PAYER);

    let notices = engine.notifications.deactivations();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].reason, DisableReason::InsufficientBalance);
    assert_eq!(notices[0].user_id, PAYER);

    // Gated commands hidden again
    let calls = engine.commands.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1.is_empty());

    // Disabled records are no longer swept
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.examined, 0);
}

// ============================================================================
// Cancellation and removal
// ============================================================================

#[tokio::test]
async fn cancelled_subscription_expires_without_charge() {
    let engine = Engine::new();
    engine.fund(PAYER, 200).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine
        .manager
        .cancel_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();

    engine.advance_days(10);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.disabled, 0);

    engine.advance_days(20);
    let report = engine.sweeper.run_once().await.unwrap();
    assert_eq!(report.disabled, 1);
    assert_eq!(report.renewed, 0);

    let sub = engine.subscription(GUILD, pro()).await.unwrap();
    assert_eq!(sub.disable_reason, Some(DisableReason::Cancelled));
    assert_eq!(engine.balance(PAYER).await, credits(150));
    assert_eq!(engine.notifications.deactivations().len(), 1);
    assert_eq!(engine.notifications.grace_count(), 0);
}

#[tokio::test]
async fn removed_feature_is_disabled_on_first_sweep() {
    let legacy = FeatureDefinition {
        id: FeatureId::new("legacy").unwrap(),
        name: "Legacy".into(),
        cost: credits(10),
        period: BillingPeriod::Monthly,
        period_days: 30,
        includes: vec![],
        gated_commands: vec![],
    };
    let before_upgrade = Engine::with_catalog(FeatureCatalog::new(vec![legacy.clone()]).unwrap());
    before_upgrade.fund(PAYER, 10).await;
    before_upgrade
        .manager
        .activate_feature(GUILD, &legacy.id, PAYER)
        .await
        .unwrap();

    // Restart with a catalog that no longer has the feature
    let engine = Engine::build(FeatureCatalog::default(), Arc::clone(&before_upgrade.backend));
    let report = engine.sweeper.run_once().await.unwrap();
    assert!(report.full_scan);
    assert_eq!(report.disabled, 1);

    let sub = engine.subscription(GUILD, legacy.id.clone()).await.unwrap();
    assert_eq!(sub.disable_reason, Some(DisableReason::FeatureRemoved));
    assert_eq!(engine.notifications.deactivations().len(), 1);
}

#[tokio::test]
async fn full_scan_repeats_until_a_tick_succeeds() {
    let legacy = FeatureDefinition {
        id: FeatureId::new("legacy").unwrap(),
        name: "Legacy".into(),
        cost: credits(10),
        period: BillingPeriod::Monthly,
        period_days: 30,
        includes: vec![],
        gated_commands: vec![],
    };
    let before_upgrade = Engine::with_catalog(FeatureCatalog::new(vec![legacy.clone()]).unwrap());
    before_upgrade.fund(PAYER, 10).await;
    before_upgrade
        .manager
        .activate_feature(GUILD, &legacy.id, PAYER)
        .await
        .unwrap();

    let engine = Engine::build(FeatureCatalog::default(), Arc::clone(&before_upgrade.backend));
    engine.faults.fail_puts.store(true, Ordering::SeqCst);
    let report = engine.sweeper.run_once().await.unwrap();
    assert!(report.full_scan);
    assert_eq!(report.failed, 1);

    // Not due for weeks, so only another full scan can reach it
    engine.faults.fail_puts.store(false, Ordering::SeqCst);
    engine.advance_hours(6);
    let report = engine.sweeper.run_once().await.unwrap();
    assert!(report.full_scan);
    assert_eq!(report.disabled, 1);

    let sub = engine.subscription(GUILD, legacy.id.clone()).await.unwrap();
    assert_eq!(sub.disable_reason, Some(DisableReason::FeatureRemoved));
    assert!(!engine.sweeper.run_once().await.unwrap().full_scan);
}

// ============================================================================
// Sweep mechanics
// ============================================================================

#[tokio::test]
async fn later_ticks_only_read_due_subscriptions() {
    let engine = Engine::new();
    engine.fund(PAYER, 200).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine
        .manager
        .activate_feature(GUILD, &analytics(), PAYER)
        .await
        .unwrap();

    let first = engine.sweeper.run_once().await.unwrap();
    assert!(first.full_scan);
    assert_eq!(first.examined, 2);

    let second = engine.sweeper.run_once().await.unwrap();
    assert!(!second.full_scan);
    assert_eq!(second.examined, 0);

    engine.advance_days(28);
    let third = engine.sweeper.run_once().await.unwrap();
    assert_eq!(third.examined, 2);
}

#[tokio::test]
async fn one_failing_subscription_does_not_stop_the_sweep() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine.fund(OTHER_USER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine
        .manager
        .activate_feature(OTHER_GUILD, &pro(), OTHER_USER)
        .await
        .unwrap();

    engine.advance_days(30);
    engine.faults.break_payer(PAYER);
    let report = engine.sweeper.run_once().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.renewed, 1);
    assert!(engine.subscription(GUILD, pro()).await.unwrap().active);
    assert_eq!(engine.balance(OTHER_USER).await, credits(0));
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine.advance_days(30);
    engine.faults.hold_debits.store(true, Ordering::SeqCst);

    let sweeper = Arc::clone(&engine.sweeper);
    let first = tokio::spawn(async move { sweeper.run_once().await });
    engine.faults.entered.notified().await;

    assert!(matches!(
        engine.sweeper.run_once().await,
        Err(SweepError::AlreadyRunning)
    ));

    engine.faults.release.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.renewed, 1);

    // The flag is cleared once the tick ends
    assert!(engine.sweeper.run_once().await.is_ok());
}

#[tokio::test]
async fn started_sweeper_ticks_and_stops_cleanly() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine.advance_days(30);

    engine.sweeper.start();
    assert!(engine.sweeper.is_started());

    // The first tick fires immediately
    for _ in 0..200 {
        if engine.balance(PAYER).await == credits(0) {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(engine.balance(PAYER).await, credits(0));

    engine.sweeper.stop().await;
    assert!(!engine.sweeper.is_started());
}

#[tokio::test]
async fn stop_waits_for_in_flight_tick() {
    let engine = Engine::new();
    engine.fund(PAYER, 100).await;
    engine
        .manager
        .activate_feature(GUILD, &pro(), PAYER)
        .await
        .unwrap();
    engine.advance_days(30);
    engine.faults.hold_debits.store(true, Ordering::SeqCst);

    engine.sweeper.start();
    engine.faults.entered.notified().await;

    let sweeper = Arc::clone(&engine.sweeper);
    let stopping = tokio::spawn(async move { sweeper.stop().await });
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(!stopping.is_finished());

    engine.faults.release.notify_one();
    stopping.await.unwrap();

    assert!(!engine.sweeper.is_started());
    let sub = engine.subscription(GUILD, pro()).await.unwrap();
    assert_eq!(sub.next_deduction_date, start_time() + Duration::days(60));
    assert_eq!(engine.balance(PAYER).await, credits(0));
    assert_eq!(
        kinds(&engine.transactions(GUILD).await),
        vec![TransactionKind::Activation, TransactionKind::Renewal]
    );
}
