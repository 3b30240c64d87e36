// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Software registry.
//!
//! Maps a software name to the workload profile used to run it. The registry
//! is validated when it is built, so a missing or malformed entry is caught at
//! startup rather than when a service is created.
//!
//! A registry file is a JSON object keyed by software name:
//!
//! ```json
//! {
//!   "minecraft": {
//!     "image": "itzg/minecraft-server:20190824",
//!     "data_dir": "/data",
//!     "target_port": 25565,
//!     "env": { "EULA": "TRUE" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use smaug_core::Container;
use thiserror::Error;

use crate::orchestrator::{PortBinding, ServiceSpec, VolumeMount};

/// Errors from the software registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SoftwareError {
    /// No profile exists for the software.
    #[error("Unknown software: {0}")]
    UnknownSoftware(String),

    /// A profile is malformed.
    #[error("Invalid profile for {software}: {reason}")]
    InvalidProfile {
        /// Software name.
        software: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The registry is empty.
    #[error("Software registry is empty")]
    Empty,

    /// Reading the registry file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing the registry file failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to run one kind of software.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Container image.
    pub image: String,
    /// Persistent data directory inside the container.
    pub data_dir: String,
    /// Port the software listens on.
    pub target_port: u16,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkloadProfile {
    fn validate(&self, software: &str) -> Result<(), SoftwareError> {
        let invalid = |reason: &str| SoftwareError::InvalidProfile {
            software: software.to_string(),
            reason: reason.to_string(),
        };

        if self.image.trim().is_empty() {
            return Err(invalid("image is empty"));
        }
        if !self.data_dir.starts_with('/') {
            return Err(invalid("data_dir must be an absolute path"));
        }
        if self.target_port == 0 {
            return Err(invalid("target_port must be non-zero"));
        }
        Ok(())
    }
}

/// Validated lookup table of workload profiles.
#[derive(Debug, Clone)]
pub struct SoftwareRegistry {
    profiles: HashMap<String, WorkloadProfile>,
}

impl Default for SoftwareRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SoftwareRegistry {
    /// Registry with the built-in profiles.
    pub fn builtin() -> Self {
        let profiles = HashMap::from([(
            "minecraft".to_string(),
            WorkloadProfile {
                image: "itzg/minecraft-server:20190824".to_string(),
                data_dir: "/data".to_string(),
                target_port: 25565,
                env: BTreeMap::from([("EULA".to_string(), "TRUE".to_string())]),
            },
        )]);
        Self { profiles }
    }

    /// Build a registry from explicit profiles, validating each one.
    pub fn from_profiles(
        profiles: HashMap<String, WorkloadProfile>,
    ) -> Result<Self, SoftwareError> {
        if profiles.is_empty() {
            return Err(SoftwareError::Empty);
        }
        for (software, profile) in &profiles {
            if software.trim().is_empty() {
                return Err(SoftwareError::InvalidProfile {
                    software: software.clone(),
                    reason: "name is empty".to_string(),
                });
            }
            profile.validate(software)?;
        }
        Ok(Self { profiles })
    }

    /// Load and validate a registry file.
    pub fn load(path: &Path) -> Result<Self, SoftwareError> {
        let raw = std::fs::read_to_string(path)?;
        let profiles: HashMap<String, WorkloadProfile> = serde_json::from_str(&raw)?;
        Self::from_profiles(profiles)
    }

    /// Get the profile of a software.
    pub fn get(&self, software: &str) -> Result<&WorkloadProfile, SoftwareError> {
        self.profiles
            .get(software)
            .ok_or_else(|| SoftwareError::UnknownSoftware(software.to_string()))
    }

    /// Whether a software is known.
    pub fn contains(&self, software: &str) -> bool {
        self.profiles.contains_key(software)
    }

    /// Known software names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Desired one-replica service for a container.
    pub fn service_spec(
        &self,
        container: &Container,
        published_port: u16,
    ) -> Result<ServiceSpec, SoftwareError> {
        let profile = self.get(&container.software)?;
        let service_id = container.service_id();

        Ok(ServiceSpec {
            name: service_id.clone(),
            image: profile.image.clone(),
            env: profile.env.clone(),
            mounts: vec![VolumeMount {
                source: service_id,
                target: profile.data_dir.clone(),
            }],
            ports: vec![PortBinding {
                target: profile.target_port,
                published: published_port,
            }],
            replicas: 1,
            labels: BTreeMap::from([
                ("smaug.container_id".to_string(), container.id.to_string()),
                ("smaug.user_id".to_string(), container.user_id.to_string()),
                ("smaug.software".to_string(), container.software.clone()),
                ("smaug.tier".to_string(), container.tier.to_string()),
            ]),
        })
    }
}
