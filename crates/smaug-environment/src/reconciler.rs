// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container status reconciler and lifecycle commands.
//!
//! The reconciler derives a whelp's liveness from the orchestrator's task
//! list and keeps the ledger and the orchestration layer in sync:
//!
//! | Latest task state | `up` | `state` |
//! |-------------------|------|---------|
//! | (no tasks) | false | `stopped` |
//! | `running` | true | `running` |
//! | `shutdown` | false | `stopped` |
//! | `failed` | false | `failed` |
//! | anything else | false | raw state |
//!
//! When the orchestrator reports the service missing, the reconciler issues
//! one background re-provision and returns [`Error::WorkloadMissing`]; the
//! status is indeterminate for that call. At most one re-provision per service
//! runs at a time.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use smaug_core::{Container, ContainerState, ContainerStatus, LedgerStore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, OrchestratorError, ServiceInfo, TaskInfo};
use crate::ports::PortAllocator;
use crate::software::SoftwareRegistry;

/// Error recorded on a container whose service could not be created.
pub const CREATE_FAILED_MESSAGE: &str = "could not create docker service";

/// Where clients connect to a running whelp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Swarm node address.
    pub address: String,
    /// Published port.
    pub port: u16,
}

/// Derive a status from a service's tasks. Only the most recently updated
/// task counts.
pub fn status_from_tasks(tasks: &[TaskInfo]) -> ContainerStatus {
    let Some(latest) = tasks.iter().max_by_key(|t| t.updated_at) else {
        return ContainerStatus::stopped();
    };

    match latest.state.as_str() {
        "running" => ContainerStatus::running(),
        "shutdown" => ContainerStatus::stopped(),
        "failed" => ContainerStatus {
            up: false,
            state: ContainerState::Failed,
        },
        other => ContainerStatus {
            up: false,
            state: ContainerState::Transitional(other.to_string()),
        },
    }
}

/// Removes a service from the provisioning set when its create finishes.
struct ProvisionGuard {
    provisioning: Arc<DashSet<String>>,
    service_id: String,
}

impl Drop for ProvisionGuard {
    fn drop(&mut self) {
        self.provisioning.remove(&self.service_id);
    }
}

/// Keeps whelps and their orchestrated services in sync.
#[derive(Clone)]
pub struct ContainerReconciler {
    ledger: Arc<dyn LedgerStore>,
    orchestrator: Arc<dyn Orchestrator>,
    ports: Arc<dyn PortAllocator>,
    software: Arc<SoftwareRegistry>,
    provisioning: Arc<DashSet<String>>,
    tracker: TaskTracker,
}

impl ContainerReconciler {
    /// Create a new reconciler.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        orchestrator: Arc<dyn Orchestrator>,
        ports: Arc<dyn PortAllocator>,
        software: Arc<SoftwareRegistry>,
    ) -> Self {
        Self {
            ledger,
            orchestrator,
            ports,
            software,
            provisioning: Arc::new(DashSet::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// The software registry used to build service specs.
    pub fn software(&self) -> &SoftwareRegistry {
        &self.software
    }

    /// Compute the current status of a container.
    pub async fn status(&self, container: &Container) -> Result<ContainerStatus> {
        let service_id = container.service_id();

        match self.orchestrator.list_tasks(&service_id).await {
            Ok(tasks) => Ok(status_from_tasks(&tasks)),
            Err(OrchestratorError::ServiceNotFound(_)) => {
                warn!(
                    container_id = container.id,
                    service_id = %service_id,
                    "Service not found, re-provisioning"
                );
                self.spawn_create(container.clone());
                Err(Error::WorkloadMissing(service_id))
            }
            Err(e) => {
                error!(
                    container_id = container.id,
                    service_id = %service_id,
                    error = %e,
                    "Could not list tasks for service"
                );
                Err(e.into())
            }
        }
    }

    /// Create the one-replica service of a container.
    ///
    /// A service that already exists under the container's name counts as
    /// created. On failure the container's last error is recorded and the
    /// failure is logged as critical. There is no retry here; the next status
    /// check that finds the service missing re-provisions it.
    pub async fn create(&self, container: &Container) -> Result<String> {
        match self.try_create(container).await {
            Ok(id) => {
                if let Err(e) = self.ledger.set_container_error(container.id, None).await {
                    warn!(container_id = container.id, error = %e, "Could not clear container error");
                }
                Ok(id)
            }
            Err(e) => {
                error!(
                    container_id = container.id,
                    service_id = %container.service_id(),
                    error = %e,
                    severity = "critical",
                    "Could not create service for container"
                );
                if let Err(ledger_err) = self
                    .ledger
                    .set_container_error(container.id, Some(CREATE_FAILED_MESSAGE))
                    .await
                {
                    error!(
                        container_id = container.id,
                        error = %ledger_err,
                        severity = "critical",
                        "Could not record container error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn try_create(&self, container: &Container) -> Result<String> {
        let service_id = container.service_id();
        let port = self.ports.allocate(&service_id).await?;
        let spec = self.software.service_spec(container, port)?;
        let id = match self.orchestrator.create_service(&spec).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                let info = self.orchestrator.inspect_service(&service_id).await?;
                debug!(
                    container_id = container.id,
                    service_id = %service_id,
                    "Service already exists"
                );
                return Ok(info.id);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            container_id = container.id,
            service_id = %service_id,
            port,
            "Created service"
        );
        Ok(id)
    }

    /// Create the service of a container in the background, unless a create
    /// for the same service is already running.
    pub fn spawn_create(&self, container: Container) {
        let service_id = container.service_id();
        if !self.provisioning.insert(service_id.clone()) {
            debug!(
                container_id = container.id,
                service_id = %service_id,
                "Re-provision already running"
            );
            return;
        }

        let guard = ProvisionGuard {
            provisioning: self.provisioning.clone(),
            service_id,
        };
        let reconciler = self.clone();
        self.tracker.spawn(async move {
            let _guard = guard;
            // Failures are logged and recorded by `create`.
            let _ = reconciler.create(&container).await;
        });
    }

    /// Scale a container's service to zero replicas. Idempotent.
    pub async fn stop(&self, container: &Container) -> Result<()> {
        self.scale(container, 0).await
    }

    /// Scale a container's service to one replica. Idempotent.
    pub async fn start(&self, container: &Container) -> Result<()> {
        self.scale(container, 1).await
    }

    async fn scale(&self, container: &Container, replicas: u64) -> Result<()> {
        let service_id = container.service_id();
        let info = self.orchestrator.inspect_service(&service_id).await?;
        if info.spec.replicas == replicas {
            return Ok(());
        }

        match self.set_replicas(&service_id, info, replicas).await {
            Ok(()) => {}
            Err(e) if e.is_out_of_sequence() => {
                // Another update got in first; look again and retry once.
                let info = self.orchestrator.inspect_service(&service_id).await?;
                if info.spec.replicas == replicas {
                    return Ok(());
                }
                self.set_replicas(&service_id, info, replicas).await?;
            }
            Err(e) => return Err(e.into()),
        }

        debug!(
            container_id = container.id,
            service_id = %service_id,
            replicas,
            "Scaled service"
        );
        Ok(())
    }

    async fn set_replicas(
        &self,
        service_id: &str,
        info: ServiceInfo,
        replicas: u64,
    ) -> std::result::Result<(), OrchestratorError> {
        let mut spec = info.spec;
        spec.replicas = replicas;
        self.orchestrator
            .update_service(service_id, info.version, &spec)
            .await
    }

    /// Remove a container's service and release its port.
    ///
    /// Callers must ensure the container is not up. A service that is already
    /// gone counts as removed.
    pub async fn remove(&self, container: &Container) -> Result<()> {
        let service_id = container.service_id();

        match self.orchestrator.remove_service(&service_id).await {
            Ok(()) => {}
            Err(OrchestratorError::ServiceNotFound(_)) => {
                debug!(service_id = %service_id, "Service already removed");
            }
            Err(e) => return Err(e.into()),
        }

        self.ports.release(&service_id).await?;
        info!(container_id = container.id, service_id = %service_id, "Removed service");
        Ok(())
    }

    /// Remove a container's service in the background.
    pub fn spawn_remove(&self, container: Container) {
        let reconciler = self.clone();
        self.tracker.spawn(async move {
            if let Err(e) = reconciler.remove(&container).await {
                error!(
                    container_id = container.id,
                    error = %e,
                    severity = "critical",
                    "Could not remove service"
                );
            }
        });
    }

    /// Address and published port of a container's service.
    pub async fn endpoint(&self, container: &Container) -> Result<Endpoint> {
        let service_id = container.service_id();
        let info = self.orchestrator.inspect_service(&service_id).await?;

        let port = info
            .published_ports
            .first()
            .map(|p| p.published)
            .ok_or_else(|| {
                OrchestratorError::InvalidResponse(format!(
                    "service {} publishes no ports",
                    service_id
                ))
            })?;
        let address = self.orchestrator.node_address().await?;

        Ok(Endpoint { address, port })
    }

    /// Number of background creates/removes still running.
    pub fn background_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every background create/remove has finished.
    pub async fn wait_for_background(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
