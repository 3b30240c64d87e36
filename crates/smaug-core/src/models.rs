// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ledger records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A platform user with a prepaid balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// User identifier (assigned by the identity provider).
    pub id: i64,
    /// Email address.
    pub email: String,
    /// Balance in internal currency units.
    pub balance: i64,
    /// Whether the user's email address has been verified.
    pub verified: bool,
}

/// A whelp: a user-provisioned, metered container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Container {
    /// Container identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Workload type (key into the software registry).
    pub software: String,
    /// Pricing/resource class.
    pub tier: i32,
    /// Last provisioning error, if any.
    pub last_error: Option<String>,
}

impl Container {
    /// Canonical orchestration identity of this container.
    ///
    /// This is the join key between the ledger and the orchestration layer.
    /// It is never stored, only recomputed.
    pub fn service_id(&self) -> String {
        format!(
            "whelp-{}-{}-{}-{}",
            self.software, self.user_id, self.tier, self.id
        )
    }
}

/// Fields required to insert a new container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContainer {
    /// Owning user.
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Workload type.
    pub software: String,
    /// Pricing/resource class.
    pub tier: i32,
}

/// Amount charged per billing tick for a `(software, tier)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Price {
    /// Workload type.
    pub software: String,
    /// Pricing/resource class.
    pub tier: i32,
    /// Internal currency units per tick.
    pub amount: i64,
}

/// A top-up awaiting confirmation from the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingTransaction {
    /// User to credit.
    pub user_id: i64,
    /// Amount in internal currency units.
    pub amount: i64,
    /// Gateway checkout session identifier.
    pub checkout_id: String,
}

/// A credited top-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompletedTransaction {
    /// Credited user.
    pub user_id: i64,
    /// Amount in internal currency units.
    pub amount: i64,
    /// Gateway checkout session identifier.
    pub checkout_id: String,
    /// When the credit was applied.
    pub completed_at: DateTime<Utc>,
}

/// Result of moving a checkout from pending to completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUpOutcome {
    /// The pending transaction was credited in this call.
    Credited {
        /// Credited user.
        user_id: i64,
        /// Credited amount.
        amount: i64,
        /// Balance after the credit.
        balance: i64,
    },
    /// The checkout was already credited; nothing changed.
    AlreadyCompleted,
    /// The checkout is in neither the pending nor the completed ledger.
    Unknown,
}

/// Liveness state derived from the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ContainerState {
    /// The most recent task is running.
    Running,
    /// No tasks, or the most recent task was shut down.
    Stopped,
    /// The most recent task failed.
    Failed,
    /// Status could not be determined.
    Unknown,
    /// Any other orchestrator task state (pending, preparing, starting, ...).
    Transitional(String),
}

impl ContainerState {
    /// Get the state string.
    pub fn as_str(&self) -> &str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Failed => "failed",
            ContainerState::Unknown => "unknown",
            ContainerState::Transitional(raw) => raw,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ContainerState> for String {
    fn from(state: ContainerState) -> Self {
        state.as_str().to_string()
    }
}

impl From<String> for ContainerState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "running" => ContainerState::Running,
            "stopped" => ContainerState::Stopped,
            "failed" => ContainerState::Failed,
            "unknown" => ContainerState::Unknown,
            _ => ContainerState::Transitional(raw),
        }
    }
}

/// Derived container status. Computed fresh on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Whether the workload is currently serving.
    pub up: bool,
    /// Detailed state.
    pub state: ContainerState,
}

impl ContainerStatus {
    /// Status of a workload with no running task.
    pub fn stopped() -> Self {
        Self {
            up: false,
            state: ContainerState::Stopped,
        }
    }

    /// Status of a workload whose latest task is running.
    pub fn running() -> Self {
        Self {
            up: true,
            state: ContainerState::Running,
        }
    }

    /// Placeholder status used when the real one could not be determined.
    pub fn unknown() -> Self {
        Self {
            up: false,
            state: ContainerState::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_is_derived_from_identity() {
        let container = Container {
            id: 42,
            user_id: 7,
            name: "survival".to_string(),
            software: "minecraft".to_string(),
            tier: 2,
            last_error: None,
        };

        assert_eq!(container.service_id(), "whelp-minecraft-7-2-42");
    }

    #[test]
    fn test_container_state_string_round() {
        for raw in ["running", "stopped", "failed", "unknown", "preparing"] {
            let state = ContainerState::from(raw.to_string());
            assert_eq!(state.as_str(), raw);
        }
        assert_eq!(
            ContainerState::from("starting".to_string()),
            ContainerState::Transitional("starting".to_string())
        );
    }

    #[test]
    fn test_container_status_serializes_state_as_string() {
        let json = serde_json::to_value(ContainerStatus::running()).unwrap();
        assert_eq!(json, serde_json::json!({"up": true, "state": "running"}));
    }
}
