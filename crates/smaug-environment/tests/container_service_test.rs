// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for request-level whelp operations.

mod common;

use common::{PORT_BASE, TIER_ONE_PRICE, TestContext};
use smaug_core::{ContainerState, User};
use smaug_environment::Error;
use smaug_environment::containers::ContainerService;

fn service(ctx: &TestContext) -> ContainerService {
    ContainerService::new(ctx.ledger.clone(), ctx.reconciler.clone())
}

#[tokio::test]
async fn test_provision_creates_container_and_service() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let containers = service(&ctx);

    let container = containers
        .provision(1, "survival", "minecraft", 1)
        .await
        .unwrap();
    assert_eq!(container.user_id, 1);
    assert_eq!(container.name, "survival");

    ctx.reconciler.wait_for_background().await;
    assert!(ctx.orchestrator.has_service(&container.service_id()).await);
    assert_eq!(ctx.ledger.list_containers_for_user(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_provision_requires_verified_user() {
    let ctx = TestContext::new().await;
    ctx.ledger
        .save_user(&User {
            id: 1,
            email: "new@example.com".to_string(),
            balance: 1000,
            verified: false,
        })
        .await
        .unwrap();

    let result = service(&ctx).provision(1, "survival", "minecraft", 1).await;
    assert!(matches!(result, Err(Error::Unverified(1))));
    assert!(ctx.ledger.list_containers_for_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_provision_requires_balance_above_price() {
    let ctx = TestContext::new().await;
    ctx.user(1, TIER_ONE_PRICE).await;

    let result = service(&ctx).provision(1, "survival", "minecraft", 1).await;
    assert!(matches!(
        result,
        Err(Error::InsufficientBalance { balance, price }) if balance == TIER_ONE_PRICE && price == TIER_ONE_PRICE
    ));
    assert_eq!(ctx.orchestrator.create_count(), 0);
}

#[tokio::test]
async fn test_provision_rejects_unknown_software_and_unpriced_tier() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let containers = service(&ctx);

    let result = containers.provision(1, "survival", "factorio", 1).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));

    let result = containers.provision(1, "survival", "minecraft", 9).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));

    let result = containers.provision(1, "  ", "minecraft", 1).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_provision_unknown_user() {
    let ctx = TestContext::new().await;

    let result = service(&ctx).provision(42, "survival", "minecraft", 1).await;
    assert!(matches!(result, Err(Error::UserNotFound(42))));
}

#[tokio::test]
async fn test_list_with_status() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let running = ctx.running_container(1, "running").await;
    let stopped = ctx.stopped_container(1, "stopped").await;
    let broken = ctx.running_container(1, "broken").await;
    ctx.orchestrator.make_unreachable(&broken.service_id()).await;

    let listed = service(&ctx).list_with_status(1).await.unwrap();
    assert_eq!(listed.len(), 3);

    let find = |id: i64| listed.iter().find(|c| c.container.id == id).unwrap();

    let entry = find(running.id);
    assert!(entry.status.up);
    let endpoint = entry.endpoint.as_ref().unwrap();
    assert_eq!(endpoint.address, "10.0.0.1");
    assert_eq!(endpoint.port, PORT_BASE);

    let entry = find(stopped.id);
    assert!(!entry.status.up);
    assert_eq!(entry.status.state, ContainerState::Stopped);
    assert!(entry.endpoint.is_none());

    let entry = find(broken.id);
    assert!(!entry.status.up);
    assert_eq!(entry.status.state, ContainerState::Unknown);
}

#[tokio::test]
async fn test_list_serializes_flat() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    ctx.stopped_container(1, "survival").await;

    let listed = service(&ctx).list_with_status(1).await.unwrap();
    let json = serde_json::to_value(&listed[0]).unwrap();

    assert_eq!(json["name"], "survival");
    assert_eq!(json["status"]["up"], false);
    assert_eq!(json["status"]["state"], "stopped");
    assert!(json.get("endpoint").is_none());
}

#[tokio::test]
async fn test_start_and_stop_check_ownership() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    ctx.user(2, 1000).await;
    let container = ctx.running_container(1, "survival").await;
    let containers = service(&ctx);

    let result = containers.stop(2, container.id).await;
    assert!(matches!(result, Err(Error::NotOwner { user_id: 2, .. })));
    assert!(ctx.reconciler.status(&container).await.unwrap().up);

    containers.stop(1, container.id).await.unwrap();
    assert!(!ctx.reconciler.status(&container).await.unwrap().up);

    let result = containers.start(2, container.id).await;
    assert!(matches!(result, Err(Error::NotOwner { .. })));

    containers.start(1, container.id).await.unwrap();
    assert!(ctx.reconciler.status(&container).await.unwrap().up);

    let result = containers.start(1, 999).await;
    assert!(matches!(result, Err(Error::ContainerNotFound(999))));
}

#[tokio::test]
async fn test_delete_running_container_is_refused() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let container = ctx.running_container(1, "survival").await;

    let result = service(&ctx).delete(1, container.id).await;
    assert!(matches!(result, Err(Error::ContainerRunning(_))));
    assert!(ctx.ledger.get_container(container.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_stopped_container() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let container = ctx.stopped_container(1, "survival").await;

    service(&ctx).delete(1, container.id).await.unwrap();
    ctx.reconciler.wait_for_background().await;

    assert!(ctx.ledger.get_container(container.id).await.unwrap().is_none());
    assert!(!ctx.orchestrator.has_service(&container.service_id()).await);
}

#[tokio::test]
async fn test_delete_requires_known_status() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    let container = ctx.stopped_container(1, "survival").await;
    ctx.orchestrator
        .make_unreachable(&container.service_id())
        .await;

    let result = service(&ctx).delete(1, container.id).await;
    assert!(matches!(result, Err(Error::Orchestrator(_))));
    assert!(ctx.ledger.get_container(container.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_by_other_user_is_refused() {
    let ctx = TestContext::new().await;
    ctx.user(1, 1000).await;
    ctx.user(2, 1000).await;
    let container = ctx.stopped_container(1, "survival").await;

    let result = service(&ctx).delete(2, container.id).await;
    assert!(matches!(result, Err(Error::NotOwner { .. })));
    assert!(ctx.ledger.get_container(container.id).await.unwrap().is_some());
}
