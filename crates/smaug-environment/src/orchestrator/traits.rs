// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrator trait definitions.
//!
//! Defines the abstract interface for the container orchestration layer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from orchestrator operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The named service does not exist.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The orchestrator rejected the request.
    #[error("Orchestrator API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the orchestrator.
        message: String,
    },

    /// The orchestrator could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The orchestrator returned something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl OrchestratorError {
    /// Whether this error means the service is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::ServiceNotFound(_))
    }

    /// Whether a create failed because a service with that name exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrchestratorError::Api { status: 409, .. })
    }

    /// Whether an update was rejected because the service changed since it
    /// was inspected.
    pub fn is_out_of_sequence(&self) -> bool {
        matches!(self, OrchestratorError::Api { message, .. } if message.contains("out of sequence"))
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A volume mounted into the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Named volume.
    pub source: String,
    /// Path inside the container.
    pub target: String,
}

/// A published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port the workload listens on.
    pub target: u16,
    /// Port published on the swarm ingress.
    pub published: u16,
}

/// Desired state of a named workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name (the container's canonical service id).
    pub name: String,
    /// Container image.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Volume mounts.
    pub mounts: Vec<VolumeMount>,
    /// Published ports.
    pub ports: Vec<PortBinding>,
    /// Desired replica count (0 = stopped, 1 = running).
    pub replicas: u64,
    /// Service labels.
    pub labels: BTreeMap<String, String>,
}

/// Result of inspecting a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Orchestrator-assigned id.
    pub id: String,
    /// Optimistic-concurrency version, required for updates.
    pub version: u64,
    /// Current spec.
    pub spec: ServiceSpec,
    /// Ports actually published by the service endpoint.
    pub published_ports: Vec<PortBinding>,
}

/// One task (scheduled replica) of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Raw task state (`running`, `shutdown`, `failed`, `preparing`, ...).
    pub state: String,
    /// Last time the orchestrator updated this task.
    pub updated_at: DateTime<Utc>,
}

/// Trait for orchestration backends.
///
/// Services are addressed by name, which is always the container's
/// canonical service id. Orchestrators are pure adapters: they do not touch
/// the ledger.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Orchestrator type identifier (e.g., "swarm", "mock")
    fn orchestrator_type(&self) -> &'static str;

    /// Create a service. Returns the orchestrator-assigned id.
    async fn create_service(&self, spec: &ServiceSpec) -> Result<String>;

    /// Replace the spec of an existing service at `version`.
    async fn update_service(&self, service: &str, version: u64, spec: &ServiceSpec) -> Result<()>;

    /// Remove a service.
    async fn remove_service(&self, service: &str) -> Result<()>;

    /// Inspect a service.
    async fn inspect_service(&self, service: &str) -> Result<ServiceInfo>;

    /// List every task of a service, in no particular order.
    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskInfo>>;

    /// Address clients use to reach published ports.
    async fn node_address(&self) -> Result<String>;
}
