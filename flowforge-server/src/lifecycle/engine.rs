//! The Lifecycle Engine (§4.4): the central component. Holds the in-memory
//! `manifestId -> PluginInstance` index plus the `pluginKey` index; every
//! mutation is mirrored to the Persistent Store (§4.1) and, through the
//! Gateway Publisher, to the external gateway (§4.5).
//!
//! Grounded on `ultrafast-gateway::plugins::PluginManager`: a `DashMap`
//! registry of lifecycle-managed objects plus a trait describing their
//! operations (there, `initialize`/`start`/`stop`/`health_check` on a fixed
//! set of three in-process plugins; here, install/start/stop/restart/
//! uninstall/update/rollback on an open set of externally-containerized
//! ones). The per-plugin keyed mutex table follows §9's explicit design
//! note ("a keyed lock table, not one global lock") rather than the
//! teacher's single `RwLock` over the whole registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowforge_runtime::container::{ContainerDriver, ContainerSpec, PortBinding, RestartPolicy, VolumeBinding};
use flowforge_runtime::gateway::GatewayPublisher;
use flowforge_runtime::model::{
    Dependency, EventKind, HealthState, LifecycleEvent, Manifest, PlatformService, PluginInstance,
    PluginStatus, UpdateAction, UpdateHistoryEntry,
};
use flowforge_runtime::resources::{parse_cpu, parse_memory};
use flowforge_runtime::validation;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::config::{OrchestratorConfig, PlatformServicesConfig};
use crate::event_bus::EventBus;
use crate::port_allocator::PortAllocator;
use crate::store::{PluginFilter, Store};

const STOP_GRACE_SECONDS: u32 = 30;
const UNINSTALL_GRACE_SECONDS: u32 = 10;
const HEALTH_OBSERVER_INITIAL_GRACE: Duration = Duration::from_secs(10);
const HEALTH_OBSERVER_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub manifest: Manifest,
    pub config_overrides: HashMap<String, Value>,
    pub env_overrides: HashMap<String, String>,
    pub auto_start: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub new_manifest: Option<Manifest>,
    pub new_image_tag: Option<String>,
}

pub struct LifecycleEngine {
    store: Arc<Store>,
    event_bus: EventBus,
    port_allocator: Arc<PortAllocator>,
    container_driver: Arc<dyn ContainerDriver>,
    gateway_publisher: Arc<dyn GatewayPublisher>,
    platform_services: PlatformServicesConfig,
    container_name_prefix: String,
    network_name: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// In-memory `pluginKey -> manifestId` index, mirroring the store (§4.4).
    key_index: DashMap<String, String>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<Store>,
        event_bus: EventBus,
        port_allocator: Arc<PortAllocator>,
        container_driver: Arc<dyn ContainerDriver>,
        gateway_publisher: Arc<dyn GatewayPublisher>,
        orchestrator: &OrchestratorConfig,
        platform_services: PlatformServicesConfig,
    ) -> Self {
        Self {
            store,
            event_bus,
            port_allocator,
            container_driver,
            gateway_publisher,
            platform_services,
            container_name_prefix: orchestrator.container_name_prefix.clone(),
            network_name: orchestrator.network_name.clone(),
            locks: DashMap::new(),
            key_index: DashMap::new(),
        }
    }

    /// Registers a `pluginKey` in the in-memory index without re-installing
    /// it; used by the Reconciler (§4.7) to seed state at startup.
    pub fn index_known(&self, plugin_key: &str, manifest_id: &str) {
        self.key_index
            .insert(plugin_key.to_string(), manifest_id.to_string());
    }

    fn lock_for(&self, plugin_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(plugin_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, plugin_key: &str) -> Result<PluginInstance, ApiError> {
        self.store
            .get_plugin(plugin_key)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(plugin_key.to_string()))
    }

    pub async fn list(&self, filter: &PluginFilter) -> Result<Vec<PluginInstance>, ApiError> {
        self.store
            .list_plugins(filter)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    async fn emit(&self, plugin_key: &str, kind: EventKind, payload: Value) {
        let event = LifecycleEvent {
            plugin_key: plugin_key.to_string(),
            kind,
            timestamp: Utc::now(),
            payload,
        };
        if let Err(e) = self.store.append_event(&event).await {
            warn!(plugin_key, error = %e, "failed to persist lifecycle event");
        }
        self.event_bus.publish(event).await;
    }

    async fn transition(
        &self,
        instance: &mut PluginInstance,
        to: PluginStatus,
    ) -> Result<(), ApiError> {
        super::state_machine::check(instance.status, to)?;
        instance.status = to;
        self.store
            .upsert_plugin(instance)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }

    /// §4.4.1.
    pub async fn install(&self, req: InstallRequest) -> Result<PluginInstance, ApiError> {
        validation::validate_manifest(&req.manifest).map_err(ApiError::from)?;
        let manifest_id = req.manifest.id.clone();

        if let Some(existing) = self
            .store
            .get_plugin_by_manifest_id(&manifest_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
        {
            if existing.status != PluginStatus::Error {
                return Err(ApiError::AlreadyInstalled(manifest_id));
            }
            // §13: an `error` row is replaced rather than blocking install.
            self.teardown_best_effort(&existing).await;
        }

        let host_port = match req.manifest.network.host_port {
            Some(fixed) => {
                if !self.port_allocator.try_reserve(fixed).await {
                    return Err(ApiError::PortInUse);
                }
                fixed
            }
            None => self.port_allocator.allocate().await?,
        };

        let plugin_key = Uuid::new_v4().to_string();
        let container_name =
            PluginInstance::container_name_for(&self.container_name_prefix, &manifest_id);

        let mut instance = PluginInstance {
            plugin_key: plugin_key.clone(),
            manifest_id: manifest_id.clone(),
            manifest: req.manifest.clone(),
            status: PluginStatus::Installing,
            container_handle: None,
            container_name: container_name.clone(),
            allocated_host_port: Some(host_port),
            effective_config: merged_config(&req.manifest, &req.config_overrides),
            effective_env: HashMap::new(),
            installed_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            last_probe_at: None,
            health_state: HealthState::Unknown,
            last_error: None,
            previous_manifest: None,
        };

        self.store
            .upsert_plugin(&instance)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.key_index.insert(plugin_key.clone(), manifest_id.clone());
        self.emit(&plugin_key, EventKind::PluginInstalling, Value::Null)
            .await;

        if let Err(e) = self
            .provision_container(&mut instance, &req.env_overrides, host_port)
            .await
        {
            instance.last_error = Some(e.to_string());
            let _ = self.transition(&mut instance, PluginStatus::Error).await;
            self.emit(&plugin_key, EventKind::PluginError, error_payload(&e))
                .await;
            return Err(e);
        }

        instance.status = PluginStatus::Installed;
        self.store
            .upsert_plugin(&instance)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.emit(&plugin_key, EventKind::PluginInstalled, Value::Null)
            .await;

        if req.auto_start.unwrap_or(true) {
            self.start(&plugin_key).await?;
            return self.get(&plugin_key).await;
        }

        Ok(instance)
    }

    async fn provision_container(
        &self,
        instance: &mut PluginInstance,
        env_overrides: &HashMap<String, String>,
        host_port: u16,
    ) -> Result<(), ApiError> {
        self.container_driver
            .ensure_network(&self.network_name)
            .await?;

        let image_ref = format!("{}:{}", instance.manifest.image.repository, instance.manifest.image.tag);
        if !self.container_driver.image_exists(&image_ref).await? {
            self.container_driver
                .pull_image(&instance.manifest.image.repository, &instance.manifest.image.tag)
                .await?;
        }

        let mut volumes = Vec::new();
        for volume in &instance.manifest.volumes {
            let volume_name = self.container_driver.ensure_volume(&volume.logical_name).await?;
            volumes.push(VolumeBinding {
                volume_name,
                container_path: volume.container_path.clone(),
                read_only: volume.read_only,
            });
        }

        let effective_env = build_env(
            &instance.manifest,
            &self.platform_services,
            env_overrides,
            host_port,
        );
        instance.effective_env = effective_env.clone();

        let spec = ContainerSpec {
            name: instance.container_name.clone(),
            image: image_ref,
            env: effective_env,
            ports: vec![PortBinding {
                container_port: instance.manifest.network.container_port,
                host_port,
            }],
            volumes,
            restart_policy: RestartPolicy::UnlessStopped,
            memory_bytes: parse_memory(&instance.manifest.resources.memory),
            cpu_nanocores: parse_cpu(&instance.manifest.resources.cpu),
            healthcheck: None,
        };

        let handle = self.container_driver.create_container(&spec).await?;
        instance.container_handle = Some(handle);
        Ok(())
    }

    /// §4.4.2.
    pub async fn start(&self, plugin_key: &str) -> Result<PluginInstance, ApiError> {
        let lock = self.lock_for(plugin_key);
        let _guard = lock
            .try_lock()
            .map_err(|_| ApiError::Busy(plugin_key.to_string()))?;

        let mut instance = self.get(plugin_key).await?;
        if !matches!(
            instance.status,
            PluginStatus::Installed | PluginStatus::Stopped | PluginStatus::Error
        ) {
            return Err(ApiError::InvalidTransition(format!(
                "cannot start from {:?}",
                instance.status
            )));
        }
        let handle = instance
            .container_handle
            .clone()
            .ok_or_else(|| ApiError::Internal("instance has no container handle".to_string()))?;

        self.transition(&mut instance, PluginStatus::Starting).await?;
        self.emit(plugin_key, EventKind::PluginStarting, Value::Null).await;

        match self.container_driver.start_container(&handle).await {
            Ok(()) => {
                instance.started_at = Some(Utc::now());
                self.transition(&mut instance, PluginStatus::Running).await?;
                self.emit(plugin_key, EventKind::PluginStarted, Value::Null).await;
                if let Err(e) = self
                    .gateway_publisher
                    .publish(&instance.manifest, &instance.container_name)
                    .await
                {
                    warn!(plugin_key, error = %e, "gateway publish failed");
                    self.emit(plugin_key, EventKind::PluginWarning, error_payload(&e))
                        .await;
                }
                Ok(instance)
            }
            Err(e) => {
                instance.last_error = Some(e.to_string());
                self.transition(&mut instance, PluginStatus::Error).await?;
                self.emit(plugin_key, EventKind::PluginError, error_payload(&e))
                    .await;
                Err(e.into())
            }
        }
    }

    /// §4.4.3.
    pub async fn stop(&self, plugin_key: &str) -> Result<PluginInstance, ApiError> {
        let lock = self.lock_for(plugin_key);
        let _guard = lock
            .try_lock()
            .map_err(|_| ApiError::Busy(plugin_key.to_string()))?;

        let mut instance = self.get(plugin_key).await?;
        if !matches!(instance.status, PluginStatus::Running | PluginStatus::Starting) {
            return Err(ApiError::InvalidTransition(format!(
                "cannot stop from {:?}",
                instance.status
            )));
        }
        let handle = instance
            .container_handle
            .clone()
            .ok_or_else(|| ApiError::Internal("instance has no container handle".to_string()))?;

        self.transition(&mut instance, PluginStatus::Stopping).await?;
        self.emit(plugin_key, EventKind::PluginStopping, Value::Null).await;

        if let Err(e) = self
            .gateway_publisher
            .unpublish(&instance.manifest_id)
            .await
        {
            warn!(plugin_key, error = %e, "gateway unpublish failed");
            self.emit(plugin_key, EventKind::PluginWarning, error_payload(&e))
                .await;
        }

        match self
            .container_driver
            .stop_container(&handle, STOP_GRACE_SECONDS)
            .await
        {
            Ok(()) => {
                instance.stopped_at = Some(Utc::now());
                self.transition(&mut instance, PluginStatus::Stopped).await?;
                self.emit(plugin_key, EventKind::PluginStopped, Value::Null).await;
                Ok(instance)
            }
            Err(e) => {
                instance.last_error = Some(e.to_string());
                self.transition(&mut instance, PluginStatus::Error).await?;
                self.emit(plugin_key, EventKind::PluginError, error_payload(&e))
                    .await;
                Err(e.into())
            }
        }
    }

    /// §4.4.4: Stop then Start; aborts on a Stop failure.
    pub async fn restart(&self, plugin_key: &str) -> Result<PluginInstance, ApiError> {
        self.stop(plugin_key).await?;
        self.start(plugin_key).await
    }

    /// §4.4.5.
    pub async fn uninstall(&self, plugin_key: &str) -> Result<(), ApiError> {
        let lock = self.lock_for(plugin_key);
        let _guard = lock
            .try_lock()
            .map_err(|_| ApiError::Busy(plugin_key.to_string()))?;

        let mut instance = self.get(plugin_key).await?;
        self.transition(&mut instance, PluginStatus::Uninstalling)
            .await?;
        self.emit(plugin_key, EventKind::PluginUninstalling, Value::Null)
            .await;

        if let Err(e) = self.teardown(&instance).await {
            instance.last_error = Some(e.to_string());
            instance.status = PluginStatus::Error;
            self.store
                .upsert_plugin(&instance)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            self.emit(plugin_key, EventKind::PluginError, error_payload(&e))
                .await;
            return Err(e);
        }

        self.store
            .remove_plugin(plugin_key)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.key_index.remove(plugin_key);
        self.locks.remove(plugin_key);
        self.emit(plugin_key, EventKind::PluginUninstalled, Value::Null)
            .await;
        Ok(())
    }

    /// The best-effort inspect/stop/remove/release/unpublish sequence shared
    /// by uninstall and by the install-over-an-error-row replace path.
    async fn teardown(&self, instance: &PluginInstance) -> Result<(), ApiError> {
        if let Some(handle) = &instance.container_handle {
            if let Ok(inspection) = self.container_driver.inspect_container(handle).await {
                if inspection.running {
                    self.container_driver
                        .stop_container(handle, UNINSTALL_GRACE_SECONDS)
                        .await?;
                }
            }
            self.container_driver.remove_container(handle, true).await?;
        }
        if let Some(port) = instance.allocated_host_port {
            self.port_allocator.release(port).await;
        }
        if let Err(e) = self.gateway_publisher.unpublish(&instance.manifest_id).await {
            warn!(plugin_key = %instance.plugin_key, error = %e, "gateway unpublish failed during teardown");
        }
        Ok(())
    }

    async fn teardown_best_effort(&self, instance: &PluginInstance) {
        if let Err(e) = self.teardown(instance).await {
            warn!(plugin_key = %instance.plugin_key, error = %e, "best-effort teardown of stale error row failed");
        }
        let _ = self.store.remove_plugin(&instance.plugin_key).await;
        self.key_index.remove(&instance.plugin_key);
    }

    /// §4.4.6 `update`.
    pub async fn update(
        &self,
        plugin_key: &str,
        req: UpdateRequest,
    ) -> Result<PluginInstance, ApiError> {
        let lock = self.lock_for(plugin_key);
        let _guard = lock
            .try_lock()
            .map_err(|_| ApiError::Busy(plugin_key.to_string()))?;

        let mut instance = self.get(plugin_key).await?;
        let previous_manifest = instance.manifest.clone();
        let new_manifest = match (req.new_manifest, req.new_image_tag) {
            (Some(manifest), _) => manifest,
            (None, Some(tag)) => {
                let mut manifest = previous_manifest.clone();
                manifest.image.tag = tag;
                manifest
            }
            (None, None) => {
                return Err(ApiError::ValidationError(
                    "update requires newManifest or newImageTag".to_string(),
                ))
            }
        };
        validation::validate_manifest(&new_manifest).map_err(ApiError::from)?;

        let host_port = instance
            .allocated_host_port
            .ok_or_else(|| ApiError::Internal("instance has no allocated port".to_string()))?;

        if let Err(e) = self
            .replace_in_place(&mut instance, &new_manifest, host_port)
            .await
        {
            // §4.4.6 step 4: automatic recovery attempt with the previous
            // version; both errors surface if recovery itself fails.
            warn!(plugin_key, error = %e, "update failed, attempting recovery with previous version");
            match self
                .replace_in_place(&mut instance, &previous_manifest, host_port)
                .await
            {
                Ok(()) => {
                    instance.last_error = Some(e.to_string());
                    self.store
                        .upsert_plugin(&instance)
                        .await
                        .map_err(|se| ApiError::Internal(se.to_string()))?;
                    self.emit(plugin_key, EventKind::PluginError, error_payload(&e))
                        .await;
                    return Err(e);
                }
                Err(recovery_err) => {
                    instance.last_error = Some(format!(
                        "update failed: {e}; recovery also failed: {recovery_err}"
                    ));
                    instance.status = PluginStatus::Error;
                    self.store
                        .upsert_plugin(&instance)
                        .await
                        .map_err(|se| ApiError::Internal(se.to_string()))?;
                    self.emit(plugin_key, EventKind::PluginError, error_payload(&e))
                        .await;
                    return Err(e);
                }
            }
        }

        instance.previous_manifest = Some(previous_manifest.clone());
        self.store
            .upsert_plugin(&instance)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.store
            .record_update(&UpdateHistoryEntry {
                plugin_key: plugin_key.to_string(),
                from_version: previous_manifest.version,
                to_version: new_manifest.version,
                action: UpdateAction::Update,
                actor: None,
                timestamp: Utc::now(),
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(instance)
    }

    /// §4.4.6 `rollback`.
    pub async fn rollback(&self, plugin_key: &str) -> Result<PluginInstance, ApiError> {
        let lock = self.lock_for(plugin_key);
        let _guard = lock
            .try_lock()
            .map_err(|_| ApiError::Busy(plugin_key.to_string()))?;

        let mut instance = self.get(plugin_key).await?;
        let retained = instance
            .previous_manifest
            .clone()
            .ok_or_else(|| ApiError::ValidationError("no retained version to roll back to".to_string()))?;
        let current = instance.manifest.clone();
        let host_port = instance
            .allocated_host_port
            .ok_or_else(|| ApiError::Internal("instance has no allocated port".to_string()))?;

        self.replace_in_place(&mut instance, &retained, host_port)
            .await?;

        instance.previous_manifest = Some(current.clone());
        self.store
            .upsert_plugin(&instance)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.store
            .record_update(&UpdateHistoryEntry {
                plugin_key: plugin_key.to_string(),
                from_version: current.version,
                to_version: retained.version,
                action: UpdateAction::Rollback,
                actor: None,
                timestamp: Utc::now(),
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(instance)
    }

    /// Stop+remove the old container, recreate from `new_manifest` at the
    /// same allocated port, start (§4.4.6 steps 2/3 collapsed: this rework
    /// always replaces in place rather than special-casing an image-tag-only
    /// change, since the daemon-side recreate cost is identical either way).
    async fn replace_in_place(
        &self,
        instance: &mut PluginInstance,
        new_manifest: &Manifest,
        host_port: u16,
    ) -> Result<(), ApiError> {
        if let Some(handle) = instance.container_handle.take() {
            self.container_driver
                .stop_container(&handle, STOP_GRACE_SECONDS)
                .await
                .ok();
            self.container_driver.remove_container(&handle, true).await?;
        }

        instance.manifest = new_manifest.clone();
        let env_overrides = instance.effective_env.clone();
        self.provision_container(instance, &env_overrides, host_port)
            .await?;
        self.container_driver
            .start_container(instance.container_handle.as_ref().unwrap())
            .await?;
        instance.started_at = Some(Utc::now());
        instance.status = PluginStatus::Running;
        Ok(())
    }

    /// §4.4.7: spawns the periodic health observer for a plugin that just
    /// entered `running`. Exits once the plugin leaves `running`.
    pub fn spawn_health_observer(self: &Arc<Self>, plugin_key: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(HEALTH_OBSERVER_INITIAL_GRACE).await;
            loop {
                let instance = match engine.store.get_plugin(&plugin_key).await {
                    Ok(Some(instance)) => instance,
                    Ok(None) => return,
                    Err(e) => {
                        error!(plugin_key, error = %e, "health observer: store read failed");
                        tokio::time::sleep(HEALTH_OBSERVER_INTERVAL).await;
                        continue;
                    }
                };
                if instance.status != PluginStatus::Running {
                    return;
                }

                if let Some(handle) = &instance.container_handle {
                    match engine.container_driver.inspect_container(handle).await {
                        Ok(inspection) => {
                            let health_state = translate_health(inspection.health_status);
                            if let Err(e) = engine
                                .store
                                .patch_plugin(&plugin_key, None, None, Some(health_state), None)
                                .await
                            {
                                warn!(plugin_key, error = %e, "health observer: patch failed");
                            }
                            engine
                                .emit(
                                    &plugin_key,
                                    EventKind::PluginHealth,
                                    serde_json::json!({ "healthState": health_state }),
                                )
                                .await;
                        }
                        Err(e) => {
                            warn!(plugin_key, error = %e, "health observer: inspect failed, continuing");
                        }
                    }
                }

                tokio::time::sleep(HEALTH_OBSERVER_INTERVAL).await;
            }
        });
    }
}

fn translate_health(status: flowforge_runtime::container::DaemonHealthStatus) -> HealthState {
    use flowforge_runtime::container::DaemonHealthStatus::*;
    match status {
        Healthy => HealthState::Healthy,
        Unhealthy => HealthState::Unhealthy,
        Starting | Unknown => HealthState::Unknown,
    }
}

fn error_payload(err: &impl std::fmt::Display) -> Value {
    serde_json::json!({ "message": err.to_string() })
}

fn merged_config(
    manifest: &Manifest,
    overrides: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut config = manifest.config.defaults.clone();
    config.extend(overrides.clone());
    config
}

/// §4.4.1 step 8: `CONTAINER_PORT`, `ENVIRONMENT=production`, platform
/// service endpoints per declared dependency, manifest defaults, then user
/// overrides — override order is user > manifest default > platform.
fn build_env(
    manifest: &Manifest,
    platform_services: &PlatformServicesConfig,
    env_overrides: &HashMap<String, String>,
    host_port: u16,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("CONTAINER_PORT".to_string(), manifest.network.container_port.to_string());
    env.insert("ENVIRONMENT".to_string(), "production".to_string());
    env.insert("HOST_PORT".to_string(), host_port.to_string());

    for dependency in &manifest.dependencies {
        if let Dependency::Platform { service } = dependency {
            let endpoint = match service {
                PlatformService::Cache => &platform_services.cache,
                PlatformService::RelationalStore => &platform_services.relational_store,
                PlatformService::VectorStore => &platform_services.vector_store,
            };
            if let Some(endpoint) = endpoint {
                let prefix = match service {
                    PlatformService::Cache => "CACHE",
                    PlatformService::RelationalStore => "RELATIONAL_STORE",
                    PlatformService::VectorStore => "VECTOR_STORE",
                };
                env.insert(format!("{prefix}_HOST"), endpoint.host.clone());
                env.insert(format!("{prefix}_PORT"), endpoint.port.to_string());
                if let Some(password) = &endpoint.password {
                    env.insert(format!("{prefix}_PASSWORD"), password.clone());
                }
            }
        }
    }

    for var in &manifest.environment {
        if let Some(default) = &var.default {
            env.insert(var.name.clone(), default.clone());
        }
    }

    for (key, value) in env_overrides {
        env.insert(key.clone(), value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_runtime::model::{ConfigContract, EnvVarSpec};
    use std::collections::HashMap as Map;

    fn manifest_with_deps() -> Manifest {
        let mut manifest = Manifest::synthesize_for_adoption("crypto", "repo/crypto", "1.0.0", 3000, 0);
        manifest.dependencies = vec![Dependency::Platform {
            service: PlatformService::Cache,
        }];
        manifest.environment = vec![EnvVarSpec {
            name: "LOG_LEVEL".to_string(),
            required: false,
            secret: false,
            default: Some("info".to_string()),
        }];
        manifest
    }

    #[test]
    fn build_env_applies_platform_service_then_manifest_default_then_override() {
        let manifest = manifest_with_deps();
        let mut platform = PlatformServicesConfig::default();
        platform.cache = Some(crate::config::PlatformEndpoint {
            host: "cache.internal".to_string(),
            port: 6379,
            password: None,
        });
        let mut overrides = Map::new();
        overrides.insert("LOG_LEVEL".to_string(), "debug".to_string());

        let env = build_env(&manifest, &platform, &overrides, 20000);

        assert_eq!(env.get("CACHE_HOST").unwrap(), "cache.internal");
        assert_eq!(env.get("LOG_LEVEL").unwrap(), "debug");
        assert_eq!(env.get("CONTAINER_PORT").unwrap(), "3000");
    }

    #[test]
    fn merged_config_overrides_win_over_manifest_defaults() {
        let mut manifest = manifest_with_deps();
        manifest.config = ConfigContract {
            schema: Value::Null,
            defaults: Map::from([("retries".to_string(), serde_json::json!(3))]),
        };
        let mut overrides = Map::new();
        overrides.insert("retries".to_string(), serde_json::json!(5));

        let config = merged_config(&manifest, &overrides);
        assert_eq!(config.get("retries").unwrap(), &serde_json::json!(5));
    }
}
