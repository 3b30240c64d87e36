// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Balance push notifications.
//!
//! Connected sessions register with the [`SubscriberRegistry`] and receive a
//! `{"subject": "balance", "body": {"balance": n}}` snapshot once per second
//! through their channel. The transport that forwards the channel to a
//! client (websocket or otherwise) lives outside this crate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smaug_core::LedgerStore;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schedule::until_next_boundary;

/// Subject of balance messages.
pub const BALANCE_SUBJECT: &str = "balance";

/// Body of a balance message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceBody {
    /// Persisted balance.
    pub balance: i64,
}

/// A balance message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Always [`BALANCE_SUBJECT`].
    pub subject: String,
    /// Message body.
    pub body: BalanceBody,
}

impl BalanceSnapshot {
    /// Snapshot of `balance`.
    pub fn new(balance: i64) -> Self {
        Self {
            subject: BALANCE_SUBJECT.to_string(),
            body: BalanceBody { balance },
        }
    }
}

/// Reads balances for push delivery.
#[derive(Clone)]
pub struct BalanceNotifier {
    ledger: Arc<dyn LedgerStore>,
}

impl BalanceNotifier {
    /// Create a new notifier.
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Current persisted balance of a user.
    pub async fn balance(&self, user_id: i64) -> Result<i64> {
        self.ledger
            .get_user(user_id)
            .await?
            .map(|u| u.balance)
            .ok_or(Error::UserNotFound(user_id))
    }

    /// Balance message for a user.
    pub async fn snapshot(&self, user_id: i64) -> Result<BalanceSnapshot> {
        Ok(BalanceSnapshot::new(self.balance(user_id).await?))
    }
}

struct Subscriber {
    user_id: i64,
    sender: mpsc::Sender<BalanceSnapshot>,
}

/// Connected sessions waiting for balance pushes.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: DashMap<Uuid, Subscriber>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `user_id`. Returns its id and the receiving end
    /// of its channel.
    pub fn subscribe(&self, user_id: i64, buffer: usize) -> (Uuid, mpsc::Receiver<BalanceSnapshot>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let id = Uuid::new_v4();
        self.subscribers.insert(id, Subscriber { user_id, sender });
        debug!(subscriber_id = %id, user_id, "Subscriber registered");
        (id, receiver)
    }

    /// Remove a session.
    pub fn unsubscribe(&self, id: &Uuid) {
        self.subscribers.remove(id);
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no sessions are connected.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn targets(&self) -> Vec<(Uuid, i64, mpsc::Sender<BalanceSnapshot>)> {
        self.subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.user_id, entry.sender.clone()))
            .collect()
    }
}

/// Summary of one push round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Snapshots delivered.
    pub delivered: usize,
    /// Subscribers skipped this round (lookup failed or channel full).
    pub skipped: usize,
    /// Subscribers removed because their receiver was dropped.
    pub disconnected: usize,
}

/// Per-second balance push loop.
pub struct NotificationLoop {
    notifier: BalanceNotifier,
    registry: Arc<SubscriberRegistry>,
    period: Duration,
    shutdown: Arc<Notify>,
}

impl NotificationLoop {
    /// Create a new push loop.
    pub fn new(
        notifier: BalanceNotifier,
        registry: Arc<SubscriberRegistry>,
        period: Duration,
    ) -> Self {
        Self {
            notifier,
            registry,
            period,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the push loop until shutdown.
    pub async fn run(&self) {
        info!(period_ms = self.period.as_millis() as u64, "Balance push loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Balance push loop received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(until_next_boundary(Utc::now(), self.period)) => {
                    self.push_once().await;
                }
            }
        }

        info!("Balance push loop stopped");
    }

    /// Push one snapshot to every subscriber.
    ///
    /// A subscriber whose balance cannot be read, or whose channel is full,
    /// is skipped for this round and stays connected.
    pub async fn push_once(&self) -> PushReport {
        let mut report = PushReport::default();

        for (id, user_id, sender) in self.registry.targets() {
            let snapshot = match self.notifier.snapshot(user_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(subscriber_id = %id, user_id, error = %e, "Could not read balance");
                    report.skipped += 1;
                    continue;
                }
            };

            match sender.try_send(snapshot) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(subscriber_id = %id, user_id, "Subscriber channel full");
                    report.skipped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.registry.unsubscribe(&id);
                    report.disconnected += 1;
                }
            }
        }

        report
    }
}
