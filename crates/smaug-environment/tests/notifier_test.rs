// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for balance push delivery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestContext;
use smaug_environment::Error;
use smaug_environment::notifier::{
    BalanceNotifier, BalanceSnapshot, NotificationLoop, SubscriberRegistry,
};

fn push_loop(ctx: &TestContext, registry: Arc<SubscriberRegistry>) -> NotificationLoop {
    NotificationLoop::new(
        BalanceNotifier::new(ctx.ledger.clone()),
        registry,
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_balance_reads_persisted_value() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let notifier = BalanceNotifier::new(ctx.ledger.clone());

    assert_eq!(notifier.balance(1).await.unwrap(), 1000);
    ctx.ledger.adjust_balance(1, -250).await.unwrap();
    assert_eq!(
        notifier.snapshot(1).await.unwrap(),
        BalanceSnapshot::new(750)
    );

    let result = notifier.balance(99).await;
    assert!(matches!(result, Err(Error::UserNotFound(99))));
}

#[tokio::test]
async fn test_push_delivers_current_balance() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let registry = Arc::new(SubscriberRegistry::new());
    let (_id, mut rx) = registry.subscribe(1, 4);
    let push = push_loop(&ctx, registry.clone());

    let report = push.push_once().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(rx.recv().await.unwrap().body.balance, 1000);

    ctx.ledger.adjust_balance(1, 500).await.unwrap();
    push.push_once().await;
    let snapshot = rx.recv().await.unwrap();
    assert_eq!(snapshot.subject, "balance");
    assert_eq!(snapshot.body.balance, 1500);
}

#[tokio::test]
async fn test_failing_subscriber_is_skipped_not_dropped() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let registry = Arc::new(SubscriberRegistry::new());
    let (_missing, _missing_rx) = registry.subscribe(99, 4);
    let (_ok, mut ok_rx) = registry.subscribe(1, 4);
    let push = push_loop(&ctx, registry.clone());

    let report = push.push_once().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(registry.len(), 2);
    assert_eq!(ok_rx.recv().await.unwrap().body.balance, 1000);
}

#[tokio::test]
async fn test_full_channel_is_skipped() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let registry = Arc::new(SubscriberRegistry::new());
    let (_id, mut rx) = registry.subscribe(1, 1);
    let push = push_loop(&ctx, registry.clone());

    assert_eq!(push.push_once().await.delivered, 1);
    let report = push.push_once().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(registry.len(), 1);

    assert_eq!(rx.recv().await.unwrap().body.balance, 1000);
    assert_eq!(push.push_once().await.delivered, 1);
}

#[tokio::test]
async fn test_closed_subscriber_is_removed() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let registry = Arc::new(SubscriberRegistry::new());
    let (_id, rx) = registry.subscribe(1, 4);
    drop(rx);
    let push = push_loop(&ctx, registry.clone());

    let report = push.push_once().await;
    assert_eq!(report.disconnected, 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_loop_pushes_every_period() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let registry = Arc::new(SubscriberRegistry::new());
    let (_id, mut rx) = registry.subscribe(1, 8);
    let push = push_loop(&ctx, registry.clone());
    let shutdown = push.shutdown_handle();

    let handle = tokio::spawn(async move { push.run().await });

    let snapshot = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no push within a period")
        .unwrap();
    assert_eq!(snapshot.body.balance, 1000);

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("push loop did not stop")
        .unwrap();
}
