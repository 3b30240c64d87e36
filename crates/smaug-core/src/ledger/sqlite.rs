// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed ledger implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{LedgerError, Result};
use crate::migrations;
use crate::models::{
    CompletedTransaction, Container, NewContainer, PendingTransaction, Price, TopUpOutcome, User,
};

use super::LedgerStore;

/// SQLite-backed ledger.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a ledger from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run migrations.
    ///
    /// In-memory databases live only as long as their connection, so a
    /// `sqlite::memory:` URL is always served by a single connection that is
    /// never recycled.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new();
        options = if in_memory {
            options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(max_connections.max(1))
        };

        let url = if in_memory || database_url.contains('?') {
            database_url.to_string()
        } else {
            format!("{}?mode=rwc", database_url)
        };

        let pool = options.connect(&url).await?;
        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, balance, verified
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, balance, verified
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, balance, verified)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                balance = excluded.balance,
                verified = excluded.verified
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.balance)
        .bind(user.verified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn adjust_balance(&self, user_id: i64, delta: i64) -> Result<i64> {
        let balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET balance = balance + ?
            WHERE id = ?
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        balance
            .map(|(balance,)| balance)
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    async fn list_containers_for_user(&self, user_id: i64) -> Result<Vec<Container>> {
        let containers = sqlx::query_as::<_, Container>(
            r#"
            SELECT id, user_id, name, software, tier, last_error
            FROM containers
            WHERE user_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(containers)
    }

    async fn get_container(&self, container_id: i64) -> Result<Option<Container>> {
        let container = sqlx::query_as::<_, Container>(
            r#"
            SELECT id, user_id, name, software, tier, last_error
            FROM containers
            WHERE id = ?
            "#,
        )
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(container)
    }

    async fn insert_container(&self, container: &NewContainer) -> Result<Container> {
        let created = sqlx::query_as::<_, Container>(
            r#"
            INSERT INTO containers (user_id, name, software, tier)
            VALUES (?, ?, ?, ?)
            RETURNING id, user_id, name, software, tier, last_error
            "#,
        )
        .bind(container.user_id)
        .bind(&container.name)
        .bind(&container.software)
        .bind(container.tier)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn delete_container(&self, user_id: i64, container_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM containers
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(user_id)
        .bind(container_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_container_error(&self, container_id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE containers
            SET last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(container_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_price(&self, software: &str, tier: i32) -> Result<Option<Price>> {
        let price = sqlx::query_as::<_, Price>(
            r#"
            SELECT software, tier, amount
            FROM prices
            WHERE software = ? AND tier = ?
            "#,
        )
        .bind(software)
        .bind(tier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    async fn save_price(&self, price: &Price) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prices (software, tier, amount)
            VALUES (?, ?, ?)
            ON CONFLICT(software, tier) DO UPDATE SET amount = excluded.amount
            "#,
        )
        .bind(&price.software)
        .bind(price.tier)
        .bind(price.amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_pending_transaction(&self, transaction: &PendingTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_transactions (checkout_id, user_id, amount)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&transaction.checkout_id)
        .bind(transaction.user_id)
        .bind(transaction.amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_pending_transaction(
        &self,
        checkout_id: &str,
    ) -> Result<Option<PendingTransaction>> {
        let pending = sqlx::query_as::<_, PendingTransaction>(
            r#"
            SELECT user_id, amount, checkout_id
            FROM pending_transactions
            WHERE checkout_id = ?
            "#,
        )
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pending)
    }

    async fn find_completed_transaction(
        &self,
        checkout_id: &str,
    ) -> Result<Option<CompletedTransaction>> {
        let completed = sqlx::query_as::<_, CompletedTransaction>(
            r#"
            SELECT user_id, amount, checkout_id, completed_at
            FROM completed_transactions
            WHERE checkout_id = ?
            "#,
        )
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(completed)
    }

    async fn complete_top_up(&self, checkout_id: &str) -> Result<TopUpOutcome> {
        let mut tx = self.pool.begin().await?;

        let pending = sqlx::query_as::<_, PendingTransaction>(
            r#"
            SELECT user_id, amount, checkout_id
            FROM pending_transactions
            WHERE checkout_id = ?
            "#,
        )
        .bind(checkout_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(pending) = pending else {
            let completed: Option<(String,)> = sqlx::query_as(
                "SELECT checkout_id FROM completed_transactions WHERE checkout_id = ?",
            )
            .bind(checkout_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(match completed {
                Some(_) => TopUpOutcome::AlreadyCompleted,
                None => TopUpOutcome::Unknown,
            });
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO completed_transactions (checkout_id, user_id, amount, completed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(checkout_id) DO NOTHING
            "#,
        )
        .bind(&pending.checkout_id)
        .bind(pending.user_id)
        .bind(pending.amount)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Credited by an earlier call; only the pending row is left over.
            sqlx::query("DELETE FROM pending_transactions WHERE checkout_id = ?")
                .bind(checkout_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(TopUpOutcome::AlreadyCompleted);
        }

        let balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET balance = balance + ?
            WHERE id = ?
            RETURNING balance
            "#,
        )
        .bind(pending.amount)
        .bind(pending.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((balance,)) = balance else {
            tx.rollback().await?;
            return Err(LedgerError::UserNotFound(pending.user_id));
        };

        sqlx::query("DELETE FROM pending_transactions WHERE checkout_id = ?")
            .bind(checkout_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(TopUpOutcome::Credited {
            user_id: pending.user_id,
            amount: pending.amount,
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create an in-memory SQLite ledger for testing.
    async fn test_ledger() -> SqliteLedger {
        SqliteLedger::connect("sqlite::memory:", 1)
            .await
            .expect("Failed to create in-memory SQLite ledger")
    }

    fn user(id: i64, balance: i64) -> User {
        User {
            id,
            email: format!("user{}@example.com", id),
            balance,
            verified: true,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_user() {
        let ledger = test_ledger().await;
        ledger.save_user(&user(1, 1000)).await.unwrap();

        let fetched = ledger.get_user(1).await.unwrap().expect("user should exist");
        assert_eq!(fetched.balance, 1000);
        assert!(fetched.verified);

        // Full-record overwrite
        let mut updated = fetched.clone();
        updated.balance = 5;
        updated.verified = false;
        ledger.save_user(&updated).await.unwrap();
        assert_eq!(ledger.get_user(1).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let ledger = test_ledger().await;
        assert!(ledger.get_user(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_adjust_balance() {
        let ledger = test_ledger().await;
        ledger.save_user(&user(1, 1000)).await.unwrap();

        assert_eq!(ledger.adjust_balance(1, -300).await.unwrap(), 700);
        assert_eq!(ledger.adjust_balance(1, -800).await.unwrap(), -100);
        assert_eq!(ledger.adjust_balance(1, 5000).await.unwrap(), 4900);
    }

    #[tokio::test]
    async fn test_adjust_balance_unknown_user() {
        let ledger = test_ledger().await;
        let result = ledger.adjust_balance(42, -1).await;
        assert!(matches!(result, Err(LedgerError::UserNotFound(42))));
    }

    #[tokio::test]
    async fn test_container_crud() {
        let ledger = test_ledger().await;
        ledger.save_user(&user(1, 0)).await.unwrap();

        let first = ledger
            .insert_container(&NewContainer {
                user_id: 1,
                name: "alpha".to_string(),
                software: "minecraft".to_string(),
                tier: 1,
            })
            .await
            .unwrap();
        let second = ledger
            .insert_container(&NewContainer {
                user_id: 1,
                name: "beta".to_string(),
                software: "minecraft".to_string(),
                tier: 2,
            })
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let listed = ledger.list_containers_for_user(1).await.unwrap();
        assert_eq!(listed, vec![first.clone(), second.clone()]);

        ledger
            .set_container_error(first.id, Some("could not create docker service"))
            .await
            .unwrap();
        let fetched = ledger.get_container(first.id).await.unwrap().unwrap();
        assert_eq!(
            fetched.last_error.as_deref(),
            Some("could not create docker service")
        );

        // Wrong owner deletes nothing
        assert!(!ledger.delete_container(2, first.id).await.unwrap());
        assert!(ledger.delete_container(1, first.id).await.unwrap());
        assert!(ledger.get_container(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_price_lookup() {
        let ledger = test_ledger().await;
        ledger
            .save_price(&Price {
                software: "minecraft".to_string(),
                tier: 1,
                amount: 300,
            })
            .await
            .unwrap();

        let price = ledger.find_price("minecraft", 1).await.unwrap().unwrap();
        assert_eq!(price.amount, 300);
        assert!(ledger.find_price("minecraft", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_top_up_credits_once() {
        let ledger = test_ledger().await;
        ledger.save_user(&user(1, 100)).await.unwrap();
        ledger
            .insert_pending_transaction(&PendingTransaction {
                user_id: 1,
                amount: 5000,
                checkout_id: "cs_1".to_string(),
            })
            .await
            .unwrap();

        let outcome = ledger.complete_top_up("cs_1").await.unwrap();
        assert_eq!(
            outcome,
            TopUpOutcome::Credited {
                user_id: 1,
                amount: 5000,
                balance: 5100
            }
        );
        assert!(ledger.find_pending_transaction("cs_1").await.unwrap().is_none());
        let completed = ledger
            .find_completed_transaction("cs_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.amount, 5000);

        // Redelivery is a no-op
        let again = ledger.complete_top_up("cs_1").await.unwrap();
        assert_eq!(again, TopUpOutcome::AlreadyCompleted);
        assert_eq!(ledger.get_user(1).await.unwrap().unwrap().balance, 5100);
    }

    #[tokio::test]
    async fn test_complete_top_up_unknown_checkout() {
        let ledger = test_ledger().await;
        let outcome = ledger.complete_top_up("cs_missing").await.unwrap();
        assert_eq!(outcome, TopUpOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_complete_top_up_leftover_pending_is_not_recredited() {
        let ledger = test_ledger().await;
        ledger.save_user(&user(1, 0)).await.unwrap();
        ledger
            .insert_pending_transaction(&PendingTransaction {
                user_id: 1,
                amount: 700,
                checkout_id: "cs_2".to_string(),
            })
            .await
            .unwrap();
        ledger.complete_top_up("cs_2").await.unwrap();

        // Simulate a pending row resurrected after the credit committed
        ledger
            .insert_pending_transaction(&PendingTransaction {
                user_id: 1,
                amount: 700,
                checkout_id: "cs_2".to_string(),
            })
            .await
            .unwrap();

        let outcome = ledger.complete_top_up("cs_2").await.unwrap();
        assert_eq!(outcome, TopUpOutcome::AlreadyCompleted);
        assert_eq!(ledger.get_user(1).await.unwrap().unwrap().balance, 700);
        assert!(ledger.find_pending_transaction("cs_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_top_up_missing_user_rolls_back() {
        let ledger = test_ledger().await;
        // Orphan a pending row by bypassing the foreign key.
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(ledger.pool())
            .await
            .unwrap();
        ledger
            .insert_pending_transaction(&PendingTransaction {
                user_id: 77,
                amount: 10,
                checkout_id: "cs_orphan".to_string(),
            })
            .await
            .unwrap();

        let result = ledger.complete_top_up("cs_orphan").await;
        assert!(matches!(result, Err(LedgerError::UserNotFound(77))));
        assert!(
            ledger
                .find_pending_transaction("cs_orphan")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            ledger
                .find_completed_transaction("cs_orphan")
                .await
                .unwrap()
                .is_none()
        );
    }
}
