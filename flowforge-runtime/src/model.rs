//! The data model (§3): `Manifest`, `PluginInstance`, `LifecycleEvent`,
//! `UpdateHistoryEntry`, `SourceRegistration`, `CatalogEntry`, and their
//! supporting enums.
//!
//! All of these are plain `serde`-derived structs, mirroring the request/
//! response model types in `ultrafast-models-sdk/src/models.rs`: no business
//! logic lives here beyond small constructors and `Default` impls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed taxonomy a manifest's `category` must belong to, if present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Ai,
    Data,
    Media,
    Integration,
    Utility,
    Analytics,
    Communication,
}

/// Platform services a plugin may declare a dependency on (§3 dependencies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformService {
    Cache,
    RelationalStore,
    VectorStore,
}

/// Container image reference: `{ repository, tag (default "latest"), digest? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// `{ containerPort, hostPort?, basePath? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
}

/// Health probe configuration, with §3's documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbe {
    #[serde(default = "default_health_path")]
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u32,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_seconds: 30,
            timeout_seconds: 5,
            retries: 3,
        }
    }
}

/// One informational endpoint declaration. The gateway publishes a single
/// route for the manifest's `basePath` regardless of how many endpoints are
/// listed here; these exist for documentation and rate-limit hints only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// One declared environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One declared volume mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub logical_name: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// `{ memory, cpu, gpu? }` resource request, as raw strings (parsed by
/// `crate::resources`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpu: default_cpu(),
            gpu: None,
        }
    }
}

/// One dependency on another plugin, or on a platform service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    Plugin {
        id: String,
        #[serde(default)]
        optional: bool,
    },
    Platform { service: PlatformService },
}

/// Config contract: JSON schema plus defaults, carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigContract {
    #[serde(default)]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
}

/// Immutable descriptor of one plugin version (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image: ImageRef,
    pub network: NetworkSpec,
    #[serde(default)]
    pub health: HealthProbe,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub config: ConfigContract,
    #[serde(default)]
    pub environment: Vec<EnvVarSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    /// The gateway-facing base path, defaulting to `/api/v1/<id>` per §3.
    pub fn effective_base_path(&self) -> String {
        self.network
            .base_path
            .clone()
            .unwrap_or_else(|| format!("/api/v1/{}", self.id))
    }

    /// A manifest synthesized for an adopted, pre-existing container (§4.7
    /// step 3's "otherwise, adopt" branch): unknown version, no endpoints.
    pub fn synthesize_for_adoption(
        manifest_id: &str,
        repository: &str,
        tag: &str,
        container_port: u16,
        host_port: u16,
    ) -> Self {
        Self {
            id: manifest_id.to_string(),
            name: manifest_id.to_string(),
            version: "unknown".to_string(),
            description: String::new(),
            author: None,
            license: None,
            icon_ref: None,
            category: None,
            tags: Vec::new(),
            image: ImageRef {
                repository: repository.to_string(),
                tag: tag.to_string(),
                digest: None,
            },
            network: NetworkSpec {
                container_port,
                host_port: Some(host_port),
                base_path: None,
            },
            health: HealthProbe::default(),
            endpoints: Vec::new(),
            config: ConfigContract::default(),
            environment: Vec::new(),
            volumes: Vec::new(),
            resources: ResourceSpec::default(),
            dependencies: Vec::new(),
        }
    }
}

/// Plugin lifecycle status (§4.4.8). A tagged variant over the closed state
/// set, per §9's design note — exhaustive matches on transitions are a
/// compile error if a state is ever added without handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Uninstalling,
}

/// Observed container health, independent of lifecycle `PluginStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Unknown
    }
}

/// An installed occurrence of a manifest (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub plugin_key: String,
    pub manifest_id: String,
    pub manifest: Manifest,
    pub status: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_handle: Option<String>,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_host_port: Option<u16>,
    #[serde(default)]
    pub effective_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub effective_env: HashMap<String, String>,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The manifest version displaced by the most recent `update`, retained
    /// so `rollback` has something to replace-in-place with (§4.4.6, §13's
    /// "exactly 2 versions retained" decision). `None` until the first
    /// update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_manifest: Option<Manifest>,
}

impl PluginInstance {
    /// A non-terminated instance occupies the `manifestId`/port namespace;
    /// only `uninstalling`'s terminal success removes the row entirely, so
    /// this always returns `true` for a persisted row — it exists to make
    /// the invariant in §3 ("unique across non-terminated instances")
    /// explicit at call sites that need to reason about it.
    pub fn is_terminated(&self) -> bool {
        false
    }

    pub fn container_name_for(prefix: &str, manifest_id: &str) -> String {
        format!("{prefix}{manifest_id}")
    }
}

/// Append-only lifecycle log row (§3, kinds enumerated in §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub plugin_key: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The closed set of event subjects published on the Event Bus (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PluginInstalling,
    PluginInstalled,
    PluginStarting,
    PluginStarted,
    PluginStopping,
    PluginStopped,
    PluginError,
    PluginHealth,
    PluginWarning,
    PluginUninstalling,
    PluginUninstalled,
}

impl EventKind {
    /// The `plugin:<kind>` subject name used on the wire and in logs.
    pub fn subject(&self) -> &'static str {
        match self {
            EventKind::PluginInstalling => "plugin:installing",
            EventKind::PluginInstalled => "plugin:installed",
            EventKind::PluginStarting => "plugin:starting",
            EventKind::PluginStarted => "plugin:started",
            EventKind::PluginStopping => "plugin:stopping",
            EventKind::PluginStopped => "plugin:stopped",
            EventKind::PluginError => "plugin:error",
            EventKind::PluginHealth => "plugin:health",
            EventKind::PluginWarning => "plugin:warning",
            EventKind::PluginUninstalling => "plugin:uninstalling",
            EventKind::PluginUninstalled => "plugin:uninstalled",
        }
    }
}

/// One action in a plugin's update/rollback history (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Install,
    Update,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub plugin_key: String,
    pub from_version: String,
    pub to_version: String,
    pub action: UpdateAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Kind of a remote plugin catalog source (§3, §9's "polymorphic source
/// fetcher" design note). `registry::source` attaches the `fetch` behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    HttpIndex,
    SourceHosting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistration {
    pub source_id: String,
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    pub enabled: bool,
    pub priority: i32,
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One plugin as seen in an aggregated marketplace catalog (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub source_id: String,
    pub manifest: Manifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub featured: bool,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_defaults_from_id() {
        let manifest = Manifest::synthesize_for_adoption("legacy", "repo/x", "latest", 3001, 4050);
        assert_eq!(manifest.effective_base_path(), "/api/v1/legacy");
    }

    #[test]
    fn explicit_base_path_wins() {
        let mut manifest = Manifest::synthesize_for_adoption("legacy", "repo/x", "latest", 3001, 4050);
        manifest.network.base_path = Some("/custom".to_string());
        assert_eq!(manifest.effective_base_path(), "/custom");
    }

    #[test]
    fn container_name_uses_prefix() {
        assert_eq!(
            PluginInstance::container_name_for("flowforge-", "crypto"),
            "flowforge-crypto"
        );
    }

    #[test]
    fn event_kind_subjects_match_spec() {
        assert_eq!(EventKind::PluginInstalling.subject(), "plugin:installing");
        assert_eq!(EventKind::PluginUninstalled.subject(), "plugin:uninstalled");
    }
}
