// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for smaug-core.
//!
//! This module defines the ledger abstraction and its backend implementations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresLedger;
pub use self::sqlite::SqliteLedger;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{LedgerError, Result};
use crate::models::{
    CompletedTransaction, Container, NewContainer, PendingTransaction, Price, TopUpOutcome, User,
};

/// Persistent ledger state consumed by the metering, top-up, and container engines.
///
/// Implementations must be safe for concurrent use from every scheduled loop.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// List every user.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Get a user by ID.
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    /// Insert or overwrite a full user record.
    async fn save_user(&self, user: &User) -> Result<()>;

    /// Atomically add `delta` to a user's balance and return the new balance.
    ///
    /// The addition is applied by the database, so concurrent debits and
    /// credits never overwrite each other.
    async fn adjust_balance(&self, user_id: i64, delta: i64) -> Result<i64>;

    /// List every container owned by a user, in a stable order.
    async fn list_containers_for_user(&self, user_id: i64) -> Result<Vec<Container>>;

    /// Get a container by ID.
    async fn get_container(&self, container_id: i64) -> Result<Option<Container>>;

    /// Insert a new container and return it with its assigned ID.
    async fn insert_container(&self, container: &NewContainer) -> Result<Container>;

    /// Delete a container owned by `user_id`. Returns false if no row matched.
    async fn delete_container(&self, user_id: i64, container_id: i64) -> Result<bool>;

    /// Record (or clear) the last provisioning error of a container.
    async fn set_container_error(&self, container_id: i64, error: Option<&str>) -> Result<()>;

    /// Look up the per-tick price of a `(software, tier)` pair.
    async fn find_price(&self, software: &str, tier: i32) -> Result<Option<Price>>;

    /// Insert or overwrite a price.
    async fn save_price(&self, price: &Price) -> Result<()>;

    /// Record a top-up awaiting gateway confirmation.
    async fn insert_pending_transaction(&self, transaction: &PendingTransaction) -> Result<()>;

    /// Find a pending top-up by checkout session.
    async fn find_pending_transaction(
        &self,
        checkout_id: &str,
    ) -> Result<Option<PendingTransaction>>;

    /// Find a completed top-up by checkout session.
    async fn find_completed_transaction(
        &self,
        checkout_id: &str,
    ) -> Result<Option<CompletedTransaction>>;

    /// Credit a confirmed checkout exactly once.
    ///
    /// In a single database transaction: insert the completed row (guarded by
    /// the unique `checkout_id`), add the amount to the user's balance, and
    /// delete the pending row. Either all three happen or none do, and calling
    /// this again for the same checkout is a no-op that returns
    /// [`TopUpOutcome::AlreadyCompleted`].
    async fn complete_top_up(&self, checkout_id: &str) -> Result<TopUpOutcome>;
}

/// Connect to the ledger named by `database_url` and apply migrations.
///
/// `postgres://` and `postgresql://` URLs select [`PostgresLedger`]; `sqlite:`
/// URLs select [`SqliteLedger`].
pub async fn connect(database_url: &str, max_connections: u32) -> Result<Arc<dyn LedgerStore>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let ledger = PostgresLedger::connect(database_url, max_connections).await?;
        Ok(Arc::new(ledger))
    } else if database_url.starts_with("sqlite:") {
        let ledger = SqliteLedger::connect(database_url, max_connections).await?;
        Ok(Arc::new(ledger))
    } else {
        Err(LedgerError::UnsupportedUrl(database_url.to_string()))
    }
}
