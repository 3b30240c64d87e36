// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker Swarm orchestrator.
//!
//! Speaks the Docker Engine HTTP API of a swarm manager. Service specs are
//! translated to and from the engine's PascalCase JSON; everything the
//! control plane creates round-trips through [`ServiceSpec`] unchanged.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireServiceSpec {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    task_template: WireTaskTemplate,
    #[serde(default)]
    mode: WireServiceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint_spec: Option<WireEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTaskTemplate {
    container_spec: WireContainerSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireContainerSpec {
    image: String,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    mounts: Vec<WireMount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMount {
    #[serde(rename = "Type")]
    kind: String,
    source: String,
    target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireServiceMode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replicated: Option<WireReplicated>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReplicated {
    #[serde(default)]
    replicas: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEndpoint {
    #[serde(default)]
    ports: Vec<WirePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WirePort {
    #[serde(default = "default_protocol")]
    protocol: String,
    target_port: u16,
    #[serde(default)]
    published_port: u16,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireService {
    #[serde(rename = "ID")]
    id: String,
    version: WireVersion,
    spec: WireServiceSpec,
    #[serde(default)]
    endpoint: Option<WireEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireVersion {
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTask {
    updated_at: DateTime<Utc>,
    status: WireTaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTaskStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCreateResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireUpdateResponse {
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInfo {
    swarm: WireSwarmInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSwarmInfo {
    #[serde(default)]
    node_addr: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorMessage {
    message: String,
}

impl From<&ServiceSpec> for WireServiceSpec {
    fn from(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            task_template: WireTaskTemplate {
                container_spec: WireContainerSpec {
                    image: spec.image.clone(),
                    env: spec
                        .env
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect(),
                    mounts: spec
                        .mounts
                        .iter()
                        .map(|m| WireMount {
                            kind: "volume".to_string(),
                            source: m.source.clone(),
                            target: m.target.clone(),
                        })
                        .collect(),
                },
            },
            mode: WireServiceMode {
                replicated: Some(WireReplicated {
                    replicas: spec.replicas,
                }),
            },
            endpoint_spec: Some(WireEndpoint {
                ports: spec.ports.iter().map(WirePort::from).collect(),
            }),
        }
    }
}

impl From<WireServiceSpec> for ServiceSpec {
    fn from(wire: WireServiceSpec) -> Self {
        let container = wire.task_template.container_spec;
        Self {
            name: wire.name,
            image: container.image,
            env: container
                .env
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry.clone(), String::new()),
                })
                .collect(),
            mounts: container
                .mounts
                .into_iter()
                .map(|m| VolumeMount {
                    source: m.source,
                    target: m.target,
                })
                .collect(),
            ports: wire
                .endpoint_spec
                .map(|e| e.ports.iter().map(PortBinding::from).collect())
                .unwrap_or_default(),
            replicas: wire.mode.replicated.map(|r| r.replicas).unwrap_or(0),
            labels: wire.labels,
        }
    }
}

impl From<&PortBinding> for WirePort {
    fn from(port: &PortBinding) -> Self {
        Self {
            protocol: default_protocol(),
            target_port: port.target,
            published_port: port.published,
        }
    }
}

impl From<&WirePort> for PortBinding {
    fn from(port: &WirePort) -> Self {
        Self {
            target: port.target_port,
            published: port.published_port,
        }
    }
}

/// Orchestrator backed by a Docker Swarm manager.
pub struct SwarmOrchestrator {
    client: Client,
    base_url: String,
}

impl SwarmOrchestrator {
    /// Create an orchestrator talking to the engine API at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create an orchestrator with a preconfigured HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map an error response. A 404 on a service-scoped call means the
    /// service does not exist.
    async fn check(response: Response, service: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND
            && let Some(service) = service
        {
            return Err(OrchestratorError::ServiceNotFound(service.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireErrorMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body);

        Err(OrchestratorError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Orchestrator for SwarmOrchestrator {
    fn orchestrator_type(&self) -> &'static str {
        "swarm"
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String> {
        let wire = WireServiceSpec::from(spec);
        let response = self
            .client
            .post(self.url("/services/create"))
            .json(&wire)
            .send()
            .await?;
        let response = Self::check(response, None).await?;
        let created: WireCreateResponse = Self::decode(response).await?;

        for warning in created.warnings.unwrap_or_default() {
            warn!(service = %spec.name, warning = %warning, "Warning while creating service");
        }

        debug!(service = %spec.name, id = %created.id, "Created service");
        Ok(created.id)
    }

    async fn update_service(&self, service: &str, version: u64, spec: &ServiceSpec) -> Result<()> {
        let wire = WireServiceSpec::from(spec);
        let response = self
            .client
            .post(self.url(&format!("/services/{}/update", service)))
            .query(&[("version", version)])
            .json(&wire)
            .send()
            .await?;
        let response = Self::check(response, Some(service)).await?;
        let updated: WireUpdateResponse = Self::decode(response).await.unwrap_or_default();

        for warning in updated.warnings.unwrap_or_default() {
            warn!(service = %service, warning = %warning, "Service update warning");
        }

        Ok(())
    }

    async fn remove_service(&self, service: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/services/{}", service)))
            .send()
            .await?;
        Self::check(response, Some(service)).await?;
        Ok(())
    }

    async fn inspect_service(&self, service: &str) -> Result<ServiceInfo> {
        let response = self
            .client
            .get(self.url(&format!("/services/{}", service)))
            .send()
            .await?;
        let response = Self::check(response, Some(service)).await?;
        let wire: WireService = Self::decode(response).await?;

        let published_ports = wire
            .endpoint
            .map(|e| e.ports.iter().map(PortBinding::from).collect())
            .unwrap_or_default();

        Ok(ServiceInfo {
            id: wire.id,
            version: wire.version.index,
            spec: wire.spec.into(),
            published_ports,
        })
    }

    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskInfo>> {
        let filters = serde_json::json!({ "service": [service] }).to_string();
        let response = self
            .client
            .get(self.url("/tasks"))
            .query(&[("filters", filters)])
            .send()
            .await?;
        let response = Self::check(response, Some(service)).await?;
        let tasks: Vec<WireTask> = Self::decode(response).await?;

        if tasks.is_empty() {
            // Some engine versions answer an unknown service filter with an
            // empty list; confirm the service exists.
            self.inspect_service(service).await?;
        }

        Ok(tasks
            .into_iter()
            .map(|t| TaskInfo {
                state: t.status.state,
                updated_at: t.updated_at,
            })
            .collect())
    }

    async fn node_address(&self) -> Result<String> {
        let response = self.client.get(self.url("/info")).send().await?;
        let response = Self::check(response, None).await?;
        let info: WireInfo = Self::decode(response).await?;

        if info.swarm.node_addr.is_empty() {
            return Err(OrchestratorError::InvalidResponse(
                "engine is not part of a swarm".to_string(),
            ));
        }

        Ok(info.swarm.node_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_round_trips_through_wire_format() {
        let spec = ServiceSpec {
            name: "whelp-minecraft-1-1-1".to_string(),
            image: "itzg/minecraft-server:20190824".to_string(),
            env: BTreeMap::from([("EULA".to_string(), "TRUE".to_string())]),
            mounts: vec![VolumeMount {
                source: "whelp-minecraft-1-1-1".to_string(),
                target: "/data".to_string(),
            }],
            ports: vec![PortBinding {
                target: 25565,
                published: 50000,
            }],
            replicas: 1,
            labels: BTreeMap::new(),
        };

        let wire = serde_json::to_value(WireServiceSpec::from(&spec)).unwrap();
        assert_eq!(wire["TaskTemplate"]["ContainerSpec"]["Env"][0], "EULA=TRUE");
        assert_eq!(wire["TaskTemplate"]["ContainerSpec"]["Mounts"][0]["Type"], "volume");
        assert_eq!(wire["Mode"]["Replicated"]["Replicas"], 1);
        assert_eq!(wire["EndpointSpec"]["Ports"][0]["PublishedPort"], 50000);

        let back: WireServiceSpec = serde_json::from_value(wire).unwrap();
        assert_eq!(ServiceSpec::from(back), spec);
    }

    #[test]
    fn test_global_mode_reads_as_zero_replicas() {
        let wire: WireServiceSpec = serde_json::from_value(serde_json::json!({
            "Name": "svc",
            "TaskTemplate": {"ContainerSpec": {"Image": "busybox"}},
            "Mode": {"Global": {}}
        }))
        .unwrap();

        let spec = ServiceSpec::from(wire);
        assert_eq!(spec.replicas, 0);
        assert!(spec.ports.is_empty());
    }
}
