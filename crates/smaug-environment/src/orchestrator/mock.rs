// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock orchestrator for testing.
//!
//! An in-memory orchestrator that behaves like a single-node swarm: creating
//! or scaling a service appends a task whose state follows the requested
//! replica count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::traits::*;

/// Mock service state.
#[derive(Debug, Clone)]
struct MockService {
    id: String,
    version: u64,
    spec: ServiceSpec,
    tasks: Vec<TaskInfo>,
}

impl MockService {
    /// Append a task stamped strictly after every existing one.
    fn push_task(&mut self, state: &str) {
        let now = Utc::now();
        let updated_at = match self.tasks.iter().map(|t| t.updated_at).max() {
            Some(latest) if latest >= now => latest + chrono::Duration::milliseconds(1),
            _ => now,
        };
        self.tasks.push(TaskInfo {
            state: state.to_string(),
            updated_at,
        });
    }
}

/// Mock orchestrator for testing.
pub struct MockOrchestrator {
    services: Arc<Mutex<HashMap<String, MockService>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    next_id: AtomicUsize,
    /// If true, every create fails
    pub fail_create: bool,
    /// Address returned by `node_address`
    pub node_address: String,
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrchestrator {
    /// Create a new mock orchestrator.
    pub fn new() -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            unreachable: Arc::new(Mutex::new(HashSet::new())),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_create: false,
            node_address: "10.0.0.1".to_string(),
        }
    }

    /// Create a mock orchestrator whose creates always fail.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    /// Register a service directly, bypassing `create_service`.
    pub async fn insert_service(&self, spec: ServiceSpec) {
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut service = MockService {
            id,
            version: 1,
            spec,
            tasks: Vec::new(),
        };
        if service.spec.replicas > 0 {
            service.push_task("running");
        }
        self.services
            .lock()
            .await
            .insert(service.spec.name.clone(), service);
    }

    /// Replace the task list of a service.
    pub async fn set_tasks(&self, service: &str, tasks: Vec<(&str, DateTime<Utc>)>) {
        let mut services = self.services.lock().await;
        if let Some(entry) = services.get_mut(service) {
            entry.tasks = tasks
                .into_iter()
                .map(|(state, updated_at)| TaskInfo {
                    state: state.to_string(),
                    updated_at,
                })
                .collect();
        }
    }

    /// Make task listing for a service fail with a non-not-found error.
    pub async fn make_unreachable(&self, service: &str) {
        self.unreachable.lock().await.insert(service.to_string());
    }

    /// Current spec of a service, if it exists.
    pub async fn service(&self, service: &str) -> Option<ServiceSpec> {
        self.services
            .lock()
            .await
            .get(service)
            .map(|s| s.spec.clone())
    }

    /// Whether a service exists.
    pub async fn has_service(&self, service: &str) -> bool {
        self.services.lock().await.contains_key(service)
    }

    /// Number of `create_service` calls, including failed ones.
    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `update_service` calls, including failed ones.
    pub fn update_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    fn orchestrator_type(&self) -> &'static str {
        "mock"
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_create {
            return Err(OrchestratorError::Api {
                status: 500,
                message: "Mock create failure".to_string(),
            });
        }

        let mut services = self.services.lock().await;
        if services.contains_key(&spec.name) {
            return Err(OrchestratorError::Api {
                status: 409,
                message: format!("name conflicts with an existing object: {}", spec.name),
            });
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut service = MockService {
            id: id.clone(),
            version: 1,
            spec: spec.clone(),
            tasks: Vec::new(),
        };
        if spec.replicas > 0 {
            service.push_task("running");
        }
        services.insert(spec.name.clone(), service);

        Ok(id)
    }

    async fn update_service(&self, service: &str, version: u64, spec: &ServiceSpec) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let mut services = self.services.lock().await;
        let entry = services
            .get_mut(service)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))?;

        if entry.version != version {
            return Err(OrchestratorError::Api {
                status: 500,
                message: "update out of sequence".to_string(),
            });
        }

        entry.spec = spec.clone();
        entry.version += 1;
        if spec.replicas > 0 {
            entry.push_task("running");
        } else {
            entry.push_task("shutdown");
        }

        Ok(())
    }

    async fn remove_service(&self, service: &str) -> Result<()> {
        self.services
            .lock()
            .await
            .remove(service)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))
    }

    async fn inspect_service(&self, service: &str) -> Result<ServiceInfo> {
        let services = self.services.lock().await;
        let entry = services
            .get(service)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))?;

        Ok(ServiceInfo {
            id: entry.id.clone(),
            version: entry.version,
            spec: entry.spec.clone(),
            published_ports: entry.spec.ports.clone(),
        })
    }

    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskInfo>> {
        if self.unreachable.lock().await.contains(service) {
            return Err(OrchestratorError::Api {
                status: 500,
                message: "Mock orchestrator unreachable".to_string(),
            });
        }

        let services = self.services.lock().await;
        services
            .get(service)
            .map(|s| s.tasks.clone())
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))
    }

    async fn node_address(&self) -> Result<String> {
        Ok(self.node_address.clone())
    }
}
