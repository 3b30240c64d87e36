// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for smaug-environment.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] smaug_core::LedgerError),

    /// Orchestration adapter failed.
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    /// Payment gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    /// Port allocation failed.
    #[error("Port allocation error: {0}")]
    Ports(#[from] crate::ports::PortError),

    /// Software registry lookup or loading failed.
    #[error("Software registry error: {0}")]
    Software(#[from] crate::software::SoftwareError),

    /// The workload for a container was missing; a re-provision was issued.
    #[error("Workload missing for service {0}; re-provisioning")]
    WorkloadMissing(String),

    /// User was not found.
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// Container was not found.
    #[error("Container not found: {0}")]
    ContainerNotFound(i64),

    /// The container belongs to another user.
    #[error("Container {container_id} is not owned by user {user_id}")]
    NotOwner {
        /// Requesting user.
        user_id: i64,
        /// Requested container.
        container_id: i64,
    },

    /// The user has not verified their email address.
    #[error("User {0} has not verified their email address")]
    Unverified(i64),

    /// The user's balance does not cover one billing tick.
    #[error("Insufficient balance: {balance} (price per tick: {price})")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Price of one tick.
        price: i64,
    },

    /// The container is running and cannot be deleted.
    #[error("Container {0} is still running")]
    ContainerRunning(i64),

    /// A circuit breaker tripped and halted its loop.
    #[error("Circuit breaker tripped: {name}")]
    CircuitBreakerTripped {
        /// Breaker name.
        name: String,
    },

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
