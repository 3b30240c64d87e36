// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-level whelp operations.
//!
//! [`ContainerService`] is what a transport layer calls on behalf of an
//! authenticated user. It enforces ownership and provisioning preconditions
//! and delegates the orchestration work to the [`ContainerReconciler`].

use std::sync::Arc;

use serde::Serialize;
use smaug_core::{Container, ContainerStatus, LedgerStore, NewContainer};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::reconciler::{ContainerReconciler, Endpoint};

/// A container with its freshly computed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerWithStatus {
    /// The ledger record.
    #[serde(flatten)]
    pub container: Container,
    /// Current status.
    pub status: ContainerStatus,
    /// Connection endpoint, present while the container is up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// User-facing whelp operations.
#[derive(Clone)]
pub struct ContainerService {
    ledger: Arc<dyn LedgerStore>,
    reconciler: ContainerReconciler,
}

impl ContainerService {
    /// Create a new container service.
    pub fn new(ledger: Arc<dyn LedgerStore>, reconciler: ContainerReconciler) -> Self {
        Self { ledger, reconciler }
    }

    /// Provision a new whelp for a user.
    ///
    /// The software must be known and priced for `tier`, the user must be
    /// verified, and the balance must exceed one tick's price. The container
    /// row is persisted first; its service is created in the background.
    pub async fn provision(
        &self,
        user_id: i64,
        name: &str,
        software: &str,
        tier: i32,
    ) -> Result<Container> {
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest("name must not be empty".to_string()));
        }
        if !self.reconciler.software().contains(software) {
            return Err(Error::InvalidRequest(format!(
                "unknown software: {}",
                software
            )));
        }

        let price = self
            .ledger
            .find_price(software, tier)
            .await?
            .ok_or_else(|| {
                Error::InvalidRequest(format!("no price for {} tier {}", software, tier))
            })?;

        let user = self
            .ledger
            .get_user(user_id)
            .await?
            .ok_or(Error::UserNotFound(user_id))?;

        if !user.verified {
            return Err(Error::Unverified(user_id));
        }
        if user.balance <= price.amount {
            return Err(Error::InsufficientBalance {
                balance: user.balance,
                price: price.amount,
            });
        }

        let container = self
            .ledger
            .insert_container(&NewContainer {
                user_id,
                name: name.to_string(),
                software: software.to_string(),
                tier,
            })
            .await?;

        info!(
            user_id,
            container_id = container.id,
            software = %software,
            tier,
            "Provisioning container"
        );
        self.reconciler.spawn_create(container.clone());

        Ok(container)
    }

    /// List a user's containers with their current status.
    ///
    /// A container whose status cannot be determined is reported as
    /// `unknown` instead of failing the whole listing.
    pub async fn list_with_status(&self, user_id: i64) -> Result<Vec<ContainerWithStatus>> {
        let containers = self.ledger.list_containers_for_user(user_id).await?;
        let mut listed = Vec::with_capacity(containers.len());

        for container in containers {
            let status = match self.reconciler.status(&container).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(container_id = container.id, error = %e, "Could not get container status");
                    ContainerStatus::unknown()
                }
            };

            let endpoint = if status.up {
                match self.reconciler.endpoint(&container).await {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        warn!(container_id = container.id, error = %e, "Could not get container endpoint");
                        None
                    }
                }
            } else {
                None
            };

            listed.push(ContainerWithStatus {
                container,
                status,
                endpoint,
            });
        }

        Ok(listed)
    }

    /// Start a container owned by `user_id`.
    pub async fn start(&self, user_id: i64, container_id: i64) -> Result<()> {
        let container = self.owned(user_id, container_id).await?;
        self.reconciler.start(&container).await
    }

    /// Stop a container owned by `user_id`.
    pub async fn stop(&self, user_id: i64, container_id: i64) -> Result<()> {
        let container = self.owned(user_id, container_id).await?;
        self.reconciler.stop(&container).await
    }

    /// Delete a stopped container owned by `user_id`.
    ///
    /// The ledger row is deleted first; the service is removed in the
    /// background.
    pub async fn delete(&self, user_id: i64, container_id: i64) -> Result<()> {
        let container = self.owned(user_id, container_id).await?;

        let status = self.reconciler.status(&container).await?;
        if status.up {
            return Err(Error::ContainerRunning(container_id));
        }

        if !self.ledger.delete_container(user_id, container_id).await? {
            return Err(Error::ContainerNotFound(container_id));
        }

        info!(user_id, container_id, "Deleted container");
        self.reconciler.spawn_remove(container);

        Ok(())
    }

    async fn owned(&self, user_id: i64, container_id: i64) -> Result<Container> {
        let container = self
            .ledger
            .get_container(container_id)
            .await?
            .ok_or(Error::ContainerNotFound(container_id))?;

        if container.user_id != user_id {
            return Err(Error::NotOwner {
                user_id,
                container_id,
            });
        }

        Ok(container)
    }
}
