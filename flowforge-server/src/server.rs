//! HTTP server setup: application state, router wiring, and the startup
//! sequence that runs cold-start reconciliation before the API surface opens
//! (§4.7, §5).
//!
//! Grounded on `ultrafast-gateway::server`: an `AppState` built once in
//! `create_server`, layered middleware via `ServiceBuilder`, one `Router`.
//! The teacher wires auth/plugin/metrics middleware around a fixed provider
//! client; this wires a CORS layer and the logging middleware around the
//! Lifecycle Engine, Registry Aggregator, and their collaborators, with a
//! reconciliation gate the teacher has no counterpart for.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use flowforge_runtime::container::{ContainerDriver, DaemonContainerDriver};
use flowforge_runtime::gateway::{GatewayPublisher, HttpGatewayPublisher};
use flowforge_runtime::model::SourceRegistration;
use flowforge_runtime::registry::RegistryAggregator;

use crate::config::Config;
use crate::event_bus::EventBus;
use crate::handlers;
use crate::lifecycle::LifecycleEngine;
use crate::middleware::{cors_layer, logging_middleware};
use crate::port_allocator::PortAllocator;
use crate::reconciler::Reconciler;
use crate::store::Store;

/// Shared state handed to every handler. All fields are cheap to clone:
/// everything mutable lives behind an `Arc` or an internal lock.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub event_bus: EventBus,
    pub port_allocator: Arc<PortAllocator>,
    pub container_driver: Arc<dyn ContainerDriver>,
    pub gateway_publisher: Arc<dyn GatewayPublisher>,
    pub engine: Arc<LifecycleEngine>,
    pub registry: Arc<RegistryAggregator>,
    /// Flips to `true` once cold-start reconciliation (§4.7) completes;
    /// `/ready` reflects it so a load balancer doesn't route traffic to a
    /// half-reconciled instance.
    pub reconciled: Arc<AtomicBool>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            event_bus: self.event_bus.clone(),
            port_allocator: self.port_allocator.clone(),
            container_driver: self.container_driver.clone(),
            gateway_publisher: self.gateway_publisher.clone(),
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            reconciled: self.reconciled.clone(),
        }
    }
}

/// Builds the application, runs cold-start reconciliation to completion, and
/// returns a `Router` ready to serve (§4.7, §5).
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let store = Arc::new(Store::connect(&config.store).await?);
    let event_bus = EventBus::new();
    let port_allocator = Arc::new(PortAllocator::new(
        config.orchestrator.port_range_start,
        config.orchestrator.port_range_end,
    ));

    let container_driver: Arc<dyn ContainerDriver> = Arc::new(DaemonContainerDriver::new(
        config.daemon.endpoint.clone(),
        config.orchestrator.volume_name_prefix.clone(),
    )?);
    let gateway_publisher: Arc<dyn GatewayPublisher> =
        Arc::new(HttpGatewayPublisher::new(config.gateway.admin_url.clone())?);

    let engine = Arc::new(LifecycleEngine::new(
        store.clone(),
        event_bus.clone(),
        port_allocator.clone(),
        container_driver.clone(),
        gateway_publisher.clone(),
        &config.orchestrator,
        config.platform_services.clone(),
    ));

    let registry = Arc::new(RegistryAggregator::new());
    let persisted_sources: Vec<SourceRegistration> = store.list_sources().await?;
    for source in persisted_sources {
        registry.register_source(source);
    }
    registry.refresh_all().await;

    let reconciler = Reconciler::new(
        store.clone(),
        engine.clone(),
        container_driver.clone(),
        port_allocator.clone(),
        config.orchestrator.container_name_prefix.clone(),
    );
    reconciler.run().await?;
    let reconciled = Arc::new(AtomicBool::new(true));

    let state = AppState {
        config: Arc::new(config),
        store,
        event_bus,
        port_allocator,
        container_driver,
        gateway_publisher,
        engine,
        registry,
        reconciled,
    };

    let app = Router::new()
        .route("/api/v1/plugins", get(handlers::list_plugins).post(handlers::install_plugin))
        .route(
            "/api/v1/plugins/{pluginKey}",
            get(handlers::get_plugin).delete(handlers::uninstall_plugin),
        )
        .route("/api/v1/plugins/{pluginKey}/start", post(handlers::start_plugin))
        .route("/api/v1/plugins/{pluginKey}/stop", post(handlers::stop_plugin))
        .route("/api/v1/plugins/{pluginKey}/restart", post(handlers::restart_plugin))
        .route("/api/v1/plugins/{pluginKey}/update", post(handlers::update_plugin))
        .route("/api/v1/plugins/{pluginKey}/rollback", post(handlers::rollback_plugin))
        .route("/api/v1/plugins/{pluginKey}/logs", get(handlers::plugin_logs))
        .route("/api/v1/plugins/{pluginKey}/updates", get(handlers::plugin_updates))
        .route("/api/v1/plugins/{pluginKey}/events", get(handlers::plugin_events))
        .route("/api/v1/marketplace/plugins", get(handlers::list_marketplace_plugins))
        .route("/api/v1/marketplace/install", post(handlers::marketplace_install))
        .route(
            "/api/v1/marketplace/install/github",
            post(handlers::marketplace_install_github),
        )
        .route("/api/v1/marketplace/packages/inspect", post(handlers::inspect_package))
        .route("/api/v1/marketplace/packages/import", post(handlers::import_package))
        .route(
            "/api/v1/marketplace/sources",
            get(handlers::list_sources).post(handlers::register_source),
        )
        .route("/api/v1/marketplace/sources/{sourceId}", axum::routing::delete(handlers::remove_source))
        .route("/api/v1/marketplace/sources/{sourceId}/toggle", post(handlers::toggle_source))
        .route("/api/v1/marketplace/sources/{sourceId}/refresh", post(handlers::refresh_source))
        .route("/api/v1/marketplace/sources/refresh-all", post(handlers::refresh_all_sources))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/ws/events", get(handlers::ws_events))
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                ))
                .layer(TimeoutLayer::new(state.config.server.request_timeout)),
        )
        .with_state(state);

    Ok(app)
}
