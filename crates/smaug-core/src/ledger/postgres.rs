// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed ledger implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{LedgerError, Result};
use crate::migrations;
use crate::models::{
    CompletedTransaction, Container, NewContainer, PendingTransaction, Price, TopUpOutcome, User,
};

use super::LedgerStore;

/// PostgreSQL-backed ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger from an existing, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
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
            WHERE id = $1
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
            VALUES ($1, $2, $3, $4)
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
            SET balance = balance + $1
            WHERE id = $2
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
            WHERE user_id = $1
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
            WHERE id = $1
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
            VALUES ($1, $2, $3, $4)
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
            WHERE user_id = $1 AND id = $2
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
            SET last_error = $1
            WHERE id = $2
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
            WHERE software = $1 AND tier = $2
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
            VALUES ($1, $2, $3)
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
            VALUES ($1, $2, $3)
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
            WHERE checkout_id = $1
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
            WHERE checkout_id = $1
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
            WHERE checkout_id = $1
            FOR UPDATE
            "#,
        )
        .bind(checkout_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(pending) = pending else {
            let completed: Option<(String,)> = sqlx::query_as(
                "SELECT checkout_id FROM completed_transactions WHERE checkout_id = $1",
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
            VALUES ($1, $2, $3, $4)
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
            sqlx::query("DELETE FROM pending_transactions WHERE checkout_id = $1")
                .bind(checkout_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(TopUpOutcome::AlreadyCompleted);
        }

        let balance: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET balance = balance + $1
            WHERE id = $2
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

        sqlx::query("DELETE FROM pending_transactions WHERE checkout_id = $1")
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
