// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the metering engine - per-tick debits and cascading shutdowns.

mod common;

use std::time::Duration;

use common::{TIER_ONE_PRICE, TestContext};
use smaug_environment::metering::{MeteringConfig, MeteringEngine};

fn engine(ctx: &TestContext) -> MeteringEngine {
    MeteringEngine::new(
        ctx.ledger.clone(),
        ctx.reconciler.clone(),
        MeteringConfig::default(),
    )
}

#[tokio::test]
async fn test_debit_with_balance_remaining() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 1000).await;
    let container = ctx.running_container(1, "survival").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();
    engine.wait_for_shutdowns().await;

    assert_eq!(bill.containers_billed, 1);
    assert_eq!(bill.debited, TIER_ONE_PRICE);
    assert_eq!(bill.balance, 700);
    assert!(!bill.shutdown_triggered);
    assert_eq!(ctx.balance(1).await, 700);
    assert!(ctx.reconciler.status(&container).await.unwrap().up);
}

#[tokio::test]
async fn test_debit_past_zero_shuts_down_everything() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 200).await;
    let running = ctx.running_container(1, "survival").await;
    let stopped = ctx.stopped_container(1, "creative").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();
    engine.wait_for_shutdowns().await;

    assert_eq!(bill.containers_billed, 1);
    assert_eq!(bill.balance, -100);
    assert!(bill.shutdown_triggered);
    assert_eq!(ctx.balance(1).await, -100);

    assert!(!ctx.reconciler.status(&running).await.unwrap().up);
    assert!(!ctx.reconciler.status(&stopped).await.unwrap().up);
}

#[tokio::test]
async fn test_landing_on_zero_triggers_shutdown() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, TIER_ONE_PRICE).await;
    let container = ctx.running_container(1, "survival").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();
    engine.wait_for_shutdowns().await;

    assert_eq!(bill.balance, 0);
    assert!(bill.shutdown_triggered);
    assert!(!ctx.reconciler.status(&container).await.unwrap().up);
}

#[tokio::test]
async fn test_only_up_containers_are_charged() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 10_000).await;
    ctx.running_container(1, "a").await;
    ctx.running_container(1, "b").await;
    ctx.stopped_container(1, "c").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();

    assert_eq!(bill.containers_billed, 2);
    assert_eq!(bill.debited, 2 * TIER_ONE_PRICE);
    assert_eq!(ctx.balance(1).await, 10_000 - 2 * TIER_ONE_PRICE);
}

#[tokio::test]
async fn test_shutdown_started_once_per_tick() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 100).await;
    ctx.running_container(1, "a").await;
    ctx.running_container(1, "b").await;
    ctx.running_container(1, "c").await;
    let engine = engine(&ctx);
    let updates_before = ctx.orchestrator.update_count();

    let bill = engine.bill_user(&user).await.unwrap();
    engine.wait_for_shutdowns().await;

    // Every container is still charged for the minute it was up
    assert_eq!(bill.containers_billed, 3);
    assert_eq!(bill.balance, 100 - 3 * TIER_ONE_PRICE);
    assert!(bill.shutdown_triggered);
    // One cascade: one scale-down per container
    assert_eq!(ctx.orchestrator.update_count() - updates_before, 3);
}

#[tokio::test]
async fn test_missing_service_is_skipped_and_recreated() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 1000).await;
    ctx.container(1, "orphan").await;
    ctx.running_container(1, "survival").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();
    ctx.reconciler.wait_for_background().await;

    assert_eq!(bill.containers_billed, 1);
    assert_eq!(ctx.balance(1).await, 1000 - TIER_ONE_PRICE);
    // One create from setup, one re-provision
    assert_eq!(ctx.orchestrator.create_count(), 2);
}

#[tokio::test]
async fn test_user_without_running_containers_is_untouched() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 0).await;
    ctx.stopped_container(1, "survival").await;
    let engine = engine(&ctx);

    let bill = engine.bill_user(&user).await.unwrap();

    assert_eq!(bill.debited, 0);
    assert!(!bill.shutdown_triggered);
    assert_eq!(ctx.balance(1).await, 0);
}

#[tokio::test]
async fn test_tick_bills_every_user() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    ctx.user(2, 200).await;
    ctx.user(3, 50).await;
    ctx.running_container(1, "one").await;
    ctx.running_container(2, "two").await;
    let engine = engine(&ctx);

    let report = engine.tick().await.unwrap();
    engine.wait_for_shutdowns().await;

    assert_eq!(report.users, 3);
    assert_eq!(report.billed_users, 3);
    assert_eq!(report.skipped_users, 0);
    assert_eq!(report.failed_users, 0);
    assert_eq!(report.containers_billed, 2);
    assert_eq!(report.total_debited, 2 * TIER_ONE_PRICE);
    assert_eq!(report.shutdowns_triggered, 1);

    assert_eq!(ctx.balance(1).await, 700);
    assert_eq!(ctx.balance(2).await, -100);
    assert_eq!(ctx.balance(3).await, 50);
}

#[tokio::test]
async fn test_debits_are_relative_to_concurrent_credits() {
    let ctx = TestContext::new().await;
    let user = ctx.user(1, 1000).await;
    ctx.running_container(1, "survival").await;
    let engine = engine(&ctx);

    // A credit lands after the engine read the user but before it debits
    ctx.ledger.adjust_balance(1, 5000).await.unwrap();
    engine.bill_user(&user).await.unwrap();

    assert_eq!(ctx.balance(1).await, 6000 - TIER_ONE_PRICE);
}

#[tokio::test]
async fn test_credit_after_snapshot_prevents_shutdown() {
    let ctx = TestContext::new().await;
    // The engine read the user at 200, which would not cover this tick
    let user = ctx.user(1, 200).await;
    let container = ctx.running_container(1, "survival").await;
    let engine = engine(&ctx);

    ctx.ledger.adjust_balance(1, 5000).await.unwrap();
    let bill = engine.bill_user(&user).await.unwrap();
    engine.wait_for_shutdowns().await;

    assert_eq!(bill.balance, 5200 - TIER_ONE_PRICE);
    assert!(!bill.shutdown_triggered);
    assert!(ctx.reconciler.status(&container).await.unwrap().up);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let ctx = TestContext::new().await;
    let engine = MeteringEngine::new(
        ctx.ledger.clone(),
        ctx.reconciler.clone(),
        MeteringConfig {
            period: Duration::from_secs(60),
            concurrency: 4,
        },
    );
    let shutdown = engine.shutdown_handle();

    let handle = tokio::spawn(async move { engine.run().await });
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("metering loop did not stop")
        .unwrap();
}
