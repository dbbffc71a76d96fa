//! Cold-start reconciliation (§4.7): runs once, to completion, before the API
//! surface opens (§5). Brings the in-memory index, the Port Allocator, and
//! the store back in sync with whatever the container daemon is actually
//! running — including containers this process didn't start itself.
//!
//! Grounded on `ultrafast-gateway::plugins::PluginManager::initialize`'s
//! startup pass over a fixed plugin set, generalized here to an open,
//! daemon-observed set reconciled against persisted rows rather than
//! hard-coded initializers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use flowforge_runtime::container::{ContainerDriver, ContainerSummary};
use flowforge_runtime::model::{Manifest, PluginInstance, PluginStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::lifecycle::LifecycleEngine;
use crate::port_allocator::PortAllocator;
use crate::store::{PluginFilter, Store};

pub struct Reconciler {
    store: Arc<Store>,
    engine: Arc<LifecycleEngine>,
    container_driver: Arc<dyn ContainerDriver>,
    port_allocator: Arc<PortAllocator>,
    container_name_prefix: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<LifecycleEngine>,
        container_driver: Arc<dyn ContainerDriver>,
        port_allocator: Arc<PortAllocator>,
        container_name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            container_driver,
            port_allocator,
            container_name_prefix: container_name_prefix.into(),
        }
    }

    /// Runs the full 5-step procedure. Errors here are fatal to startup
    /// (§4.4.9: "store unavailable at startup" is the only hard-stop case;
    /// a daemon that's merely unreachable still lets reconciliation continue
    /// with an empty container set so the API surface can open).
    pub async fn run(&self) -> anyhow::Result<()> {
        let instances = self.store.list_plugins(&PluginFilter::default()).await?;

        let mut used_ports = Vec::new();
        let mut by_manifest_id: HashMap<String, PluginInstance> = HashMap::new();
        for instance in &instances {
            self.engine
                .index_known(&instance.plugin_key, &instance.manifest_id);
            if let Some(port) = instance.allocated_host_port {
                used_ports.push(port);
            }
            by_manifest_id.insert(instance.manifest_id.clone(), instance.clone());
        }
        self.port_allocator.seed(used_ports).await;

        let containers = match self
            .container_driver
            .list_managed_containers(&self.container_name_prefix)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "reconciliation: daemon unreachable, continuing with no observed containers");
                Vec::new()
            }
        };

        let mut seen_manifest_ids = HashSet::new();
        for container in &containers {
            let Some(manifest_id) = container.name.strip_prefix(&self.container_name_prefix) else {
                continue;
            };
            seen_manifest_ids.insert(manifest_id.to_string());

            match by_manifest_id.get(manifest_id) {
                Some(instance) => self.reconcile_known(instance, container).await,
                None => self.adopt(container, manifest_id).await,
            }
        }

        for instance in &instances {
            if seen_manifest_ids.contains(&instance.manifest_id) {
                continue;
            }
            if instance.container_handle.is_none() {
                continue;
            }
            if matches!(
                instance.status,
                PluginStatus::Running | PluginStatus::Starting | PluginStatus::Stopping
            ) {
                info!(
                    manifest_id = %instance.manifest_id,
                    "reconciliation: no matching container observed, marking stopped",
                );
                if let Err(e) = self
                    .store
                    .patch_plugin(
                        &instance.plugin_key,
                        Some(PluginStatus::Stopped),
                        Some(None),
                        None,
                        None,
                    )
                    .await
                {
                    warn!(plugin_key = %instance.plugin_key, error = %e, "reconciliation: failed to mark stopped");
                }
            }
        }

        let reconciled = self.store.list_plugins(&PluginFilter::default()).await?;
        for instance in reconciled {
            if instance.status == PluginStatus::Running {
                self.engine.spawn_health_observer(instance.plugin_key);
            }
        }

        Ok(())
    }

    /// A container matching a known `manifestId`: fold its observed
    /// running state back into the persisted row.
    async fn reconcile_known(&self, instance: &PluginInstance, container: &ContainerSummary) {
        let observed_status = if container.running {
            PluginStatus::Running
        } else {
            PluginStatus::Stopped
        };
        if instance.status == observed_status && instance.container_handle.as_deref() == Some(&container.handle) {
            return;
        }
        info!(
            manifest_id = %instance.manifest_id,
            observed_status = ?observed_status,
            "reconciliation: syncing persisted status with observed container state",
        );
        if let Err(e) = self
            .store
            .patch_plugin(
                &instance.plugin_key,
                Some(observed_status),
                Some(Some(container.handle.clone())),
                None,
                None,
            )
            .await
        {
            warn!(plugin_key = %instance.plugin_key, error = %e, "reconciliation: failed to sync known instance");
        }
    }

    /// A container the store has no row for: synthesize a manifest and
    /// register it as a freshly-discovered instance (§4.7 step 3, "otherwise
    /// adopt").
    async fn adopt(&self, container: &ContainerSummary, manifest_id: &str) {
        let Some(binding) = container.ports.first() else {
            warn!(
                container_name = %container.name,
                "reconciliation: adoption candidate has no port bindings, skipping",
            );
            return;
        };
        let (repository, tag) = split_image_ref(&container.image_ref);
        let manifest = Manifest::synthesize_for_adoption(
            manifest_id,
            &repository,
            &tag,
            binding.container_port,
            binding.host_port,
        );

        self.port_allocator.seed([binding.host_port]).await;

        let plugin_key = Uuid::new_v4().to_string();
        let status = if container.running {
            PluginStatus::Running
        } else {
            PluginStatus::Stopped
        };
        let instance = PluginInstance {
            plugin_key: plugin_key.clone(),
            manifest_id: manifest_id.to_string(),
            manifest,
            status,
            container_handle: Some(container.handle.clone()),
            container_name: container.name.clone(),
            allocated_host_port: Some(binding.host_port),
            effective_config: HashMap::new(),
            effective_env: HashMap::new(),
            installed_at: Utc::now(),
            started_at: if container.running { Some(Utc::now()) } else { None },
            stopped_at: None,
            last_probe_at: None,
            health_state: Default::default(),
            last_error: None,
            previous_manifest: None,
        };

        info!(manifest_id, container_name = %container.name, "reconciliation: adopted an unmanaged container");
        if let Err(e) = self.store.upsert_plugin(&instance).await {
            warn!(manifest_id, error = %e, "reconciliation: failed to persist adopted instance");
            return;
        }
        self.engine.index_known(&plugin_key, manifest_id);
    }
}

fn split_image_ref(image_ref: &str) -> (String, String) {
    match image_ref.rsplit_once(':') {
        Some((repository, tag)) => (repository.to_string(), tag.to_string()),
        None => (image_ref.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_repository_and_tag() {
        assert_eq!(
            split_image_ref("flowforge/crypto:1.2.0"),
            ("flowforge/crypto".to_string(), "1.2.0".to_string())
        );
    }

    #[test]
    fn defaults_to_latest_with_no_tag() {
        assert_eq!(
            split_image_ref("flowforge/crypto"),
            ("flowforge/crypto".to_string(), "latest".to_string())
        );
    }
}
