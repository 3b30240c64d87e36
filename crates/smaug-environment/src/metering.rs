// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metering engine.
//!
//! Once per minute every user is billed for each of their containers that is
//! up. Users are billed concurrently and independently:
//!
//! 1. Fetch the user's containers and compute each one's status.
//! 2. For every container that is up, add its tick price to the user's debit.
//! 3. Apply the accumulated debit with one atomic balance adjustment.
//! 4. If the adjusted balance is zero or below, start one cascading shutdown
//!    of all the user's containers in the background.
//!
//! Per-container failures (status, price) are logged and that container is
//! skipped. Failing to fetch containers or to persist the debit aborts only
//! that user's tick. A user whose previous tick is still running is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use smaug_core::{LedgerStore, User};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::ContainerReconciler;
use crate::schedule::until_next_boundary;

/// Configuration for the metering engine.
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    /// Billing period.
    pub period: Duration,
    /// Users billed concurrently.
    pub concurrency: usize,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            concurrency: 16,
        }
    }
}

/// Result of billing one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBill {
    /// Containers found up and charged.
    pub containers_billed: usize,
    /// Total amount debited.
    pub debited: i64,
    /// Balance after the debit (unchanged if nothing was debited).
    pub balance: i64,
    /// Whether a cascading shutdown was started.
    pub shutdown_triggered: bool,
}

/// Summary of one metering tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Users fetched.
    pub users: usize,
    /// Users billed to completion.
    pub billed_users: usize,
    /// Users skipped because their previous tick was still running.
    pub skipped_users: usize,
    /// Users whose tick was aborted.
    pub failed_users: usize,
    /// Containers charged across all users.
    pub containers_billed: usize,
    /// Total amount debited across all users.
    pub total_debited: i64,
    /// Cascading shutdowns started.
    pub shutdowns_triggered: usize,
}

/// Removes a user from the in-flight set when their billing finishes.
struct InFlightGuard {
    in_flight: Arc<DashSet<i64>>,
    user_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.user_id);
    }
}

/// Per-minute billing loop.
#[derive(Clone)]
pub struct MeteringEngine {
    ledger: Arc<dyn LedgerStore>,
    reconciler: ContainerReconciler,
    config: MeteringConfig,
    in_flight: Arc<DashSet<i64>>,
    permits: Arc<Semaphore>,
    shutdowns: TaskTracker,
    shutdown: Arc<Notify>,
}

impl MeteringEngine {
    /// Create a new metering engine.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        reconciler: ContainerReconciler,
        config: MeteringConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            ledger,
            reconciler,
            config,
            in_flight: Arc::new(DashSet::new()),
            permits,
            shutdowns: TaskTracker::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the metering loop, ticking on whole minutes (or whole periods).
    ///
    /// Each tick runs as its own task so a slow tick never delays the next
    /// one. The loop exits when the shutdown signal is received, after
    /// in-progress ticks and shutdowns finish.
    pub async fn run(&self) {
        info!(
            period_secs = self.config.period.as_secs(),
            concurrency = self.config.concurrency,
            "Metering engine started"
        );

        let ticks = TaskTracker::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Metering engine received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(until_next_boundary(Utc::now(), self.config.period)) => {
                    let engine = self.clone();
                    ticks.spawn(async move {
                        match engine.tick().await {
                            Ok(report) => info!(
                                users = report.users,
                                billed = report.billed_users,
                                skipped = report.skipped_users,
                                failed = report.failed_users,
                                debited = report.total_debited,
                                shutdowns = report.shutdowns_triggered,
                                "Metering tick complete"
                            ),
                            Err(e) => error!(
                                error = %e,
                                severity = "critical",
                                "Metering tick failed"
                            ),
                        }
                    });
                }
            }
        }

        ticks.close();
        ticks.wait().await;
        self.wait_for_shutdowns().await;

        info!("Metering engine stopped");
    }

    /// Bill every user once.
    ///
    /// Returns an error only if the user list cannot be fetched.
    pub async fn tick(&self) -> Result<TickReport> {
        let users = self.ledger.list_users().await.inspect_err(|e| {
            error!(error = %e, severity = "critical", "Could not fetch users for billing");
        })?;

        let mut report = TickReport {
            users: users.len(),
            ..Default::default()
        };
        let mut billing = JoinSet::new();

        for user in users {
            if !self.in_flight.insert(user.id) {
                warn!(user_id = user.id, "Previous billing still running, skipping user");
                report.skipped_users += 1;
                continue;
            }

            let guard = InFlightGuard {
                in_flight: self.in_flight.clone(),
                user_id: user.id,
            };
            let engine = self.clone();

            billing.spawn(async move {
                let _guard = guard;
                let _permit = engine
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(format!("Billing semaphore closed: {}", e)))?;
                engine.bill_user(&user).await
            });
        }

        while let Some(joined) = billing.join_next().await {
            match joined {
                Ok(Ok(bill)) => {
                    report.billed_users += 1;
                    report.containers_billed += bill.containers_billed;
                    report.total_debited += bill.debited;
                    if bill.shutdown_triggered {
                        report.shutdowns_triggered += 1;
                    }
                }
                Ok(Err(_)) => report.failed_users += 1,
                Err(e) => {
                    error!(error = %e, severity = "critical", "Billing task panicked");
                    report.failed_users += 1;
                }
            }
        }

        Ok(report)
    }

    /// Bill one user for the current tick.
    pub async fn bill_user(&self, user: &User) -> Result<UserBill> {
        let containers = self
            .ledger
            .list_containers_for_user(user.id)
            .await
            .inspect_err(|e| {
                error!(
                    user_id = user.id,
                    error = %e,
                    severity = "critical",
                    "Could not fetch containers for billing"
                );
            })?;

        let mut bill = UserBill {
            balance: user.balance,
            ..Default::default()
        };

        for container in &containers {
            let status = match self.reconciler.status(container).await {
                Ok(status) => status,
                Err(e) => {
                    error!(
                        user_id = user.id,
                        container_id = container.id,
                        error = %e,
                        severity = "critical",
                        "Could not get status for container"
                    );
                    continue;
                }
            };

            if !status.up {
                continue;
            }

            let price = match self
                .ledger
                .find_price(&container.software, container.tier)
                .await
            {
                Ok(Some(price)) => price,
                Ok(None) => {
                    error!(
                        container_id = container.id,
                        software = %container.software,
                        tier = container.tier,
                        severity = "critical",
                        "No price for software/tier"
                    );
                    continue;
                }
                Err(e) => {
                    error!(
                        container_id = container.id,
                        software = %container.software,
                        tier = container.tier,
                        error = %e,
                        severity = "critical",
                        "Could not find price"
                    );
                    continue;
                }
            };

            bill.debited += price.amount;
            bill.containers_billed += 1;
        }

        if bill.debited > 0 {
            bill.balance = self
                .ledger
                .adjust_balance(user.id, -bill.debited)
                .await
                .inspect_err(|e| {
                    error!(
                        user_id = user.id,
                        debit = bill.debited,
                        error = %e,
                        severity = "critical",
                        "Could not persist billed balance"
                    );
                })?;

            // Persisted balance, not the one the user was listed with.
            if bill.balance <= 0 {
                warn!(
                    user_id = user.id,
                    balance = bill.balance,
                    "User out of balance, shutting down containers"
                );
                self.spawn_shutdown(user.id);
                bill.shutdown_triggered = true;
            }
        }

        debug!(
            user_id = user.id,
            containers = bill.containers_billed,
            debited = bill.debited,
            balance = bill.balance,
            "Billed user"
        );

        Ok(bill)
    }

    /// Stop every container of a user in the background.
    fn spawn_shutdown(&self, user_id: i64) {
        let ledger = self.ledger.clone();
        let reconciler = self.reconciler.clone();

        self.shutdowns.spawn(async move {
            let containers = match ledger.list_containers_for_user(user_id).await {
                Ok(containers) => containers,
                Err(e) => {
                    error!(
                        user_id,
                        error = %e,
                        "Could not shut down containers for out-of-balance user"
                    );
                    return;
                }
            };

            for container in containers {
                if let Err(e) = reconciler.stop(&container).await {
                    error!(
                        user_id,
                        container_id = container.id,
                        error = %e,
                        "Could not shut down container for out-of-balance user"
                    );
                }
            }
        });
    }

    /// Wait until every cascading shutdown started so far has finished.
    pub async fn wait_for_shutdowns(&self) {
        self.shutdowns.close();
        self.shutdowns.wait().await;
        self.shutdowns.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MockOrchestrator;
    use crate::ports::InMemoryPortAllocator;
    use crate::software::SoftwareRegistry;
    use smaug_core::ledger::SqliteLedger;

    async fn engine_with_user(balance: i64) -> MeteringEngine {
        let ledger: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedger::connect("sqlite::memory:", 1).await.unwrap());
        ledger
            .save_user(&User {
                id: 1,
                email: "a@example.com".to_string(),
                balance,
                verified: true,
            })
            .await
            .unwrap();

        let reconciler = ContainerReconciler::new(
            ledger.clone(),
            Arc::new(MockOrchestrator::new()),
            Arc::new(InMemoryPortAllocator::new(50000)),
            Arc::new(SoftwareRegistry::builtin()),
        );
        MeteringEngine::new(ledger, reconciler, MeteringConfig::default())
    }

    #[tokio::test]
    async fn test_tick_skips_user_still_in_flight() {
        let engine = engine_with_user(1000).await;
        engine.in_flight.insert(1);

        let report = engine.tick().await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.skipped_users, 1);
        assert_eq!(report.billed_users, 0);

        // The skipped user is still owned by the earlier tick
        assert!(engine.in_flight.contains(&1));
    }

    #[tokio::test]
    async fn test_in_flight_released_after_tick() {
        let engine = engine_with_user(1000).await;

        let report = engine.tick().await.unwrap();
        assert_eq!(report.billed_users, 1);
        assert!(engine.in_flight.is_empty());

        let report = engine.tick().await.unwrap();
        assert_eq!(report.skipped_users, 0);
    }
}
