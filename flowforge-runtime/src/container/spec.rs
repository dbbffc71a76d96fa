//! Types exchanged with the container daemon (§4.3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Port binding between a container's internal port and the allocated host
/// port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// Translated healthcheck, handed to the daemon's native healthcheck field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u32,
}

/// Restart policy; the orchestrator always requests "restart unless stopped"
/// (§4.3) but the field is carried so the driver stays a thin adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    UnlessStopped,
}

/// Everything `createContainer` needs (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeBinding>,
    pub restart_policy: RestartPolicy,
    pub memory_bytes: u64,
    pub cpu_nanocores: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub volume_name: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Observed container state, `inspectContainer`'s return shape (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInspection {
    pub running: bool,
    pub health_status: DaemonHealthStatus,
    pub ports: Vec<PortBinding>,
    pub image_ref: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The daemon's own healthcheck vocabulary, distinct from
/// `model::HealthState` — translated into it by the Lifecycle Engine's
/// health observer (§4.4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonHealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    Unknown,
}

/// One row of `listManagedContainers` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub handle: String,
    pub name: String,
    pub image_ref: String,
    pub running: bool,
    pub ports: Vec<PortBinding>,
}

/// An opaque, daemon-assigned container identifier.
pub type ContainerHandle = String;
