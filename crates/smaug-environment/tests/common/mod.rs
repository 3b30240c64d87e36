// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for smaug-environment tests.
//!
//! Provides an in-memory ledger wired to the mock orchestrator, an in-process
//! port allocator, and the built-in software registry.

#![allow(dead_code)]

use std::sync::Arc;

use smaug_core::ledger::SqliteLedger;
use smaug_core::{Container, LedgerStore, NewContainer, Price, User};
use smaug_environment::orchestrator::MockOrchestrator;
use smaug_environment::ports::InMemoryPortAllocator;
use smaug_environment::reconciler::ContainerReconciler;
use smaug_environment::software::SoftwareRegistry;

/// First published port handed out in tests.
pub const PORT_BASE: u16 = 50000;

/// Tick price of `minecraft` tier 1 seeded by [`TestContext::new`].
pub const TIER_ONE_PRICE: i64 = 300;

/// Ledger, mock orchestrator, and reconciler sharing one in-memory database.
pub struct TestContext {
    pub ledger: Arc<dyn LedgerStore>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub reconciler: ContainerReconciler,
}

impl TestContext {
    /// Context with a healthy orchestrator.
    pub async fn new() -> Self {
        Self::with_orchestrator(MockOrchestrator::new()).await
    }

    /// Context with a caller-configured orchestrator.
    pub async fn with_orchestrator(orchestrator: MockOrchestrator) -> Self {
        let ledger: Arc<dyn LedgerStore> = Arc::new(
            SqliteLedger::connect("sqlite::memory:", 1)
                .await
                .expect("Failed to open in-memory ledger"),
        );
        ledger
            .save_price(&Price {
                software: "minecraft".to_string(),
                tier: 1,
                amount: TIER_ONE_PRICE,
            })
            .await
            .expect("Failed to seed price");

        let orchestrator = Arc::new(orchestrator);
        let reconciler = ContainerReconciler::new(
            ledger.clone(),
            orchestrator.clone(),
            Arc::new(InMemoryPortAllocator::new(PORT_BASE)),
            Arc::new(SoftwareRegistry::builtin()),
        );

        Self {
            ledger,
            orchestrator,
            reconciler,
        }
    }

    /// Insert a verified user with `balance`.
    pub async fn user(&self, id: i64, balance: i64) -> User {
        let user = User {
            id,
            email: format!("user{}@example.com", id),
            balance,
            verified: true,
        };
        self.ledger
            .save_user(&user)
            .await
            .expect("Failed to save user");
        user
    }

    /// Insert a `minecraft` tier 1 container for `user_id` without a service.
    pub async fn container(&self, user_id: i64, name: &str) -> Container {
        self.ledger
            .insert_container(&NewContainer {
                user_id,
                name: name.to_string(),
                software: "minecraft".to_string(),
                tier: 1,
            })
            .await
            .expect("Failed to insert container")
    }

    /// Insert a container and create its running service.
    pub async fn running_container(&self, user_id: i64, name: &str) -> Container {
        let container = self.container(user_id, name).await;
        self.reconciler
            .create(&container)
            .await
            .expect("Failed to create service");
        container
    }

    /// Insert a container whose service exists but is scaled to zero.
    pub async fn stopped_container(&self, user_id: i64, name: &str) -> Container {
        let container = self.running_container(user_id, name).await;
        self.reconciler
            .stop(&container)
            .await
            .expect("Failed to stop service");
        container
    }

    /// Persisted balance of a user.
    pub async fn balance(&self, user_id: i64) -> i64 {
        self.ledger
            .get_user(user_id)
            .await
            .expect("Failed to get user")
            .expect("User not found")
            .balance
    }
}
