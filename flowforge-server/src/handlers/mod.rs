//! HTTP request handlers (§6): the full API surface over the Lifecycle
//! Engine, the Registry Aggregator, and the Persistent Store.
//!
//! Every handler builds its own response envelope rather than leaning on
//! `ApiError`'s `IntoResponse` impl, since only the handler has the real
//! `RequestContext` pulled from the request's extensions — `ApiError` on its
//! own has no request to thread a `requestId` from.

use std::collections::HashMap;
use std::io::Cursor;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Multipart, Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use flowforge_runtime::container::ContainerDriver;
use flowforge_runtime::model::{
    CatalogEntry, HealthState, Manifest, PluginInstance, PluginStatus, SourceKind,
    SourceRegistration,
};
use flowforge_runtime::registry::CatalogFilter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::lifecycle::{InstallRequest, UpdateRequest};
use crate::metrics;
use crate::request_context::RequestContext;
use crate::server::AppState;
use crate::store::PluginFilter;

fn success<T: Serialize>(status: StatusCode, request_id: &str, data: T) -> Response {
    (
        status,
        Json(json!({
            "success": true,
            "data": data,
            "requestId": request_id,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// §6 plugin summary: the fields a list view needs, without the full
/// manifest/config/env payload `PluginInstance` carries.
#[derive(Debug, Serialize)]
struct PluginSummary {
    plugin_key: String,
    manifest_id: String,
    name: String,
    version: String,
    status: PluginStatus,
    health_state: HealthState,
    allocated_host_port: Option<u16>,
    installed_at: chrono::DateTime<Utc>,
}

impl From<&PluginInstance> for PluginSummary {
    fn from(instance: &PluginInstance) -> Self {
        Self {
            plugin_key: instance.plugin_key.clone(),
            manifest_id: instance.manifest_id.clone(),
            name: instance.manifest.name.clone(),
            version: instance.manifest.version.clone(),
            status: instance.status,
            health_state: instance.health_state,
            allocated_host_port: instance.allocated_host_port,
            installed_at: instance.installed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPluginsQuery {
    status: Option<PluginStatus>,
}

pub async fn list_plugins(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Query(query): Query<ListPluginsQuery>,
) -> Response {
    let filter = PluginFilter {
        status: query.status,
        manifest_ids: None,
    };
    match state.engine.list(&filter).await {
        Ok(instances) => {
            let plugins: Vec<PluginSummary> = instances.iter().map(PluginSummary::from).collect();
            success(
                StatusCode::OK,
                &ctx.request_id,
                json!({ "plugins": plugins, "total": plugins.len() }),
            )
        }
        Err(e) => e.respond(&ctx.request_id),
    }
}

pub async fn get_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.get(&plugin_key).await {
        Ok(instance) => success(StatusCode::OK, &ctx.request_id, instance),
        Err(e) => e.respond(&ctx.request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallBody {
    manifest: Option<Manifest>,
    manifest_url: Option<String>,
    #[serde(default)]
    config: HashMap<String, Value>,
    #[serde(default)]
    environment: HashMap<String, String>,
    auto_start: Option<bool>,
}

/// Fetches a bare `Manifest` document from an arbitrary URL. Distinct from
/// `flowforge_runtime::registry::source::fetch`, which expects a source's
/// index/catalog document shape, not a standalone manifest.
async fn fetch_manifest_from_url(url: &str) -> Result<Manifest, ApiError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| ApiError::RegistryFetchFailed(e.to_string()))?
        .error_for_status()
        .map_err(|e| ApiError::RegistryFetchFailed(e.to_string()))?;
    response
        .json::<Manifest>()
        .await
        .map_err(|e| ApiError::ValidationError(format!("invalid manifest document: {e}")))
}

pub async fn install_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Json(body): Json<InstallBody>,
) -> Response {
    let manifest = match (body.manifest, body.manifest_url) {
        (Some(manifest), _) => manifest,
        (None, Some(url)) => match fetch_manifest_from_url(&url).await {
            Ok(manifest) => manifest,
            Err(e) => return e.respond(&ctx.request_id),
        },
        (None, None) => {
            return ApiError::ValidationError(
                "install requires manifest or manifestUrl".to_string(),
            )
            .respond(&ctx.request_id)
        }
    };

    let result = state
        .engine
        .install(InstallRequest {
            manifest,
            config_overrides: body.config,
            env_overrides: body.environment,
            auto_start: body.auto_start,
        })
        .await;

    match result {
        Ok(instance) => {
            metrics::record_install_success();
            if instance.status == PluginStatus::Running {
                state.engine.spawn_health_observer(instance.plugin_key.clone());
            }
            success(StatusCode::CREATED, &ctx.request_id, instance)
        }
        Err(e) => {
            metrics::record_install_failure();
            e.respond(&ctx.request_id)
        }
    }
}

pub async fn start_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.start(&plugin_key).await {
        Ok(instance) => {
            state.engine.spawn_health_observer(plugin_key.clone());
            success(StatusCode::OK, &ctx.request_id, instance)
        }
        Err(e) => e.respond(&ctx.request_id),
    }
}

pub async fn stop_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.stop(&plugin_key).await {
        Ok(instance) => success(StatusCode::OK, &ctx.request_id, instance),
        Err(e) => e.respond(&ctx.request_id),
    }
}

pub async fn restart_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.restart(&plugin_key).await {
        Ok(instance) => {
            state.engine.spawn_health_observer(plugin_key.clone());
            success(StatusCode::OK, &ctx.request_id, instance)
        }
        Err(e) => e.respond(&ctx.request_id),
    }
}

pub async fn uninstall_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.uninstall(&plugin_key).await {
        Ok(()) => {
            metrics::record_uninstall();
            success(StatusCode::OK, &ctx.request_id, json!({ "pluginKey": plugin_key }))
        }
        Err(e) => e.respond(&ctx.request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePluginBody {
    new_manifest: Option<Manifest>,
    new_image_tag: Option<String>,
    bundle_url: Option<String>,
}

pub async fn update_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
    Json(body): Json<UpdatePluginBody>,
) -> Response {
    let new_manifest = if let Some(manifest) = body.new_manifest {
        Some(manifest)
    } else if let Some(url) = body.bundle_url {
        match fetch_bundle_manifest(&url).await {
            Ok(manifest) => Some(manifest),
            Err(e) => return e.respond(&ctx.request_id),
        }
    } else {
        None
    };

    let result = state
        .engine
        .update(
            &plugin_key,
            UpdateRequest {
                new_manifest,
                new_image_tag: body.new_image_tag,
            },
        )
        .await;
    match result {
        Ok(instance) => success(StatusCode::OK, &ctx.request_id, instance),
        Err(e) => e.respond(&ctx.request_id),
    }
}

/// Downloads a `.pkg` archive from an arbitrary URL and inspects it for its
/// embedded manifest, for handlers that accept a `bundleUrl` in place of an
/// uploaded archive.
async fn fetch_bundle_manifest(url: &str) -> Result<Manifest, ApiError> {
    let bytes = reqwest::get(url)
        .await
        .map_err(|e| ApiError::RegistryFetchFailed(e.to_string()))?
        .error_for_status()
        .map_err(|e| ApiError::RegistryFetchFailed(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| ApiError::RegistryFetchFailed(e.to_string()))?;
    let len = bytes.len() as u64;
    let inspection = flowforge_runtime::registry::inspect_package(Cursor::new(bytes), len)?;
    Ok(inspection.manifest)
}

pub async fn rollback_plugin(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.engine.rollback(&plugin_key).await {
        Ok(instance) => success(StatusCode::OK, &ctx.request_id, instance),
        Err(e) => e.respond(&ctx.request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct TailLogsQuery {
    #[serde(default = "default_tail")]
    tail: u32,
}

fn default_tail() -> u32 {
    200
}

pub async fn plugin_logs(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
    Query(query): Query<TailLogsQuery>,
) -> Response {
    let instance = match state.engine.get(&plugin_key).await {
        Ok(instance) => instance,
        Err(e) => return e.respond(&ctx.request_id),
    };
    let Some(handle) = &instance.container_handle else {
        return success(StatusCode::OK, &ctx.request_id, json!({ "lines": Vec::<String>::new() }));
    };
    match state.container_driver.tail_logs(handle, query.tail).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.lines().collect();
            success(StatusCode::OK, &ctx.request_id, json!({ "lines": lines }))
        }
        Err(e) => ApiError::from(e).respond(&ctx.request_id),
    }
}

pub async fn plugin_updates(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
) -> Response {
    match state.store.list_history(&plugin_key).await {
        Ok(history) => success(StatusCode::OK, &ctx.request_id, json!({ "history": history })),
        Err(e) => ApiError::Internal(e.to_string()).respond(&ctx.request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    #[serde(default = "default_events_limit")]
    limit: i64,
}

fn default_events_limit() -> i64 {
    50
}

/// §12 supplement: a bounded-history polling fallback for clients that can't
/// hold a `/ws/events` connection open.
pub async fn plugin_events(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(plugin_key): Path<String>,
    Query(query): Query<RecentEventsQuery>,
) -> Response {
    match state.store.recent_events(&plugin_key, query.limit).await {
        Ok(events) => success(StatusCode::OK, &ctx.request_id, json!({ "events": events })),
        Err(e) => ApiError::Internal(e.to_string()).respond(&ctx.request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketplaceQuery {
    category: Option<String>,
    verified: Option<bool>,
    featured: Option<bool>,
    search: Option<String>,
}

pub async fn list_marketplace_plugins(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Query(query): Query<MarketplaceQuery>,
) -> Response {
    let filter = CatalogFilter {
        category: query.category,
        verified: query.verified,
        featured: query.featured,
        search: query.search,
    };
    let plugins = state.registry.list(&filter);
    success(
        StatusCode::OK,
        &ctx.request_id,
        json!({ "plugins": plugins, "total": plugins.len() }),
    )
}

#[derive(Debug, Deserialize)]
pub struct MarketplaceInstallBody {
    manifest_id: String,
    #[serde(default)]
    config: HashMap<String, Value>,
    #[serde(default)]
    environment: HashMap<String, String>,
    auto_start: Option<bool>,
}

async fn install_catalog_entry(
    state: &AppState,
    entry: CatalogEntry,
    config: HashMap<String, Value>,
    environment: HashMap<String, String>,
    auto_start: Option<bool>,
) -> Result<PluginInstance, ApiError> {
    let instance = state
        .engine
        .install(InstallRequest {
            manifest: entry.manifest,
            config_overrides: config,
            env_overrides: environment,
            auto_start,
        })
        .await?;
    if instance.status == PluginStatus::Running {
        state.engine.spawn_health_observer(instance.plugin_key.clone());
    }
    Ok(instance)
}

pub async fn marketplace_install(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Json(body): Json<MarketplaceInstallBody>,
) -> Response {
    let Some(entry) = state.registry.get(&body.manifest_id) else {
        return ApiError::NotFound(body.manifest_id).respond(&ctx.request_id);
    };
    match install_catalog_entry(&state, entry, body.config, body.environment, body.auto_start).await {
        Ok(instance) => {
            metrics::record_install_success();
            success(StatusCode::CREATED, &ctx.request_id, instance)
        }
        Err(e) => {
            metrics::record_install_failure();
            e.respond(&ctx.request_id)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GithubInstallBody {
    repository: String,
    #[serde(default)]
    config: HashMap<String, Value>,
    #[serde(default)]
    environment: HashMap<String, String>,
    auto_start: Option<bool>,
}

/// `POST /api/v1/marketplace/install/github`: resolve `{repository}` to a
/// source-hosting manifest document and install its first catalog entry.
pub async fn marketplace_install_github(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Json(body): Json<GithubInstallBody>,
) -> Response {
    let source_id = format!("github:{}", body.repository);
    let url = format!("https://raw.githubusercontent.com/{}/main", body.repository);
    let entries = match flowforge_runtime::registry::source::fetch(&source_id, SourceKind::SourceHosting, &url).await
    {
        Ok(entries) => entries,
        Err(e) => return ApiError::from(e).respond(&ctx.request_id),
    };
    let Some(entry) = entries.into_iter().next() else {
        return ApiError::NotFound(body.repository).respond(&ctx.request_id);
    };
    match install_catalog_entry(&state, entry, body.config, body.environment, body.auto_start).await {
        Ok(instance) => {
            metrics::record_install_success();
            success(StatusCode::CREATED, &ctx.request_id, instance)
        }
        Err(e) => {
            metrics::record_install_failure();
            e.respond(&ctx.request_id)
        }
    }
}

#[derive(Debug, Serialize)]
struct InspectionResponse {
    #[serde(flatten)]
    inspection: flowforge_runtime::registry::PackageInspection,
    already_installed: bool,
}

async fn read_package_upload(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationError(e.to_string()))?
    {
        if field.name() == Some("package") {
            return field
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ApiError::ValidationError(e.to_string()));
        }
    }
    Err(ApiError::ValidationError(
        "multipart body has no `package` field".to_string(),
    ))
}

pub async fn inspect_package(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    mut multipart: Multipart,
) -> Response {
    let bytes = match read_package_upload(&mut multipart).await {
        Ok(bytes) => bytes,
        Err(e) => return e.respond(&ctx.request_id),
    };
    let len = bytes.len() as u64;
    let inspection = match flowforge_runtime::registry::inspect_package(Cursor::new(bytes), len) {
        Ok(inspection) => inspection,
        Err(e) => return ApiError::from(e).respond(&ctx.request_id),
    };
    let already_installed = match state
        .store
        .get_plugin_by_manifest_id(&inspection.manifest.id)
        .await
    {
        Ok(existing) => existing.is_some(),
        Err(e) => return ApiError::Internal(e.to_string()).respond(&ctx.request_id),
    };
    success(
        StatusCode::OK,
        &ctx.request_id,
        InspectionResponse {
            inspection,
            already_installed,
        },
    )
}

#[derive(Debug, Deserialize)]
pub struct ImportPackageQuery {
    auto_start: Option<bool>,
}

pub async fn import_package(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Query(query): Query<ImportPackageQuery>,
    mut multipart: Multipart,
) -> Response {
    let bytes = match read_package_upload(&mut multipart).await {
        Ok(bytes) => bytes,
        Err(e) => return e.respond(&ctx.request_id),
    };
    let len = bytes.len() as u64;
    let inspection = match flowforge_runtime::registry::inspect_package(Cursor::new(bytes), len) {
        Ok(inspection) => inspection,
        Err(e) => return ApiError::from(e).respond(&ctx.request_id),
    };

    let result = state
        .engine
        .install(InstallRequest {
            manifest: inspection.manifest,
            config_overrides: HashMap::new(),
            env_overrides: HashMap::new(),
            auto_start: query.auto_start,
        })
        .await;
    match result {
        Ok(instance) => {
            metrics::record_install_success();
            if instance.status == PluginStatus::Running {
                state.engine.spawn_health_observer(instance.plugin_key.clone());
            }
            success(StatusCode::CREATED, &ctx.request_id, instance)
        }
        Err(e) => {
            metrics::record_install_failure();
            e.respond(&ctx.request_id)
        }
    }
}

pub async fn list_sources(State(state): State<AppState>, ctx: Extension<RequestContext>) -> Response {
    success(StatusCode::OK, &ctx.request_id, state.registry.sources())
}

#[derive(Debug, Deserialize)]
pub struct RegisterSourceBody {
    name: String,
    url: String,
    kind: SourceKind,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    is_default: bool,
}

fn default_true() -> bool {
    true
}

pub async fn register_source(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Json(body): Json<RegisterSourceBody>,
) -> Response {
    let source = SourceRegistration {
        source_id: Uuid::new_v4().to_string(),
        name: body.name,
        url: body.url,
        kind: body.kind,
        enabled: body.enabled,
        priority: body.priority,
        is_default: body.is_default,
        last_fetched_at: None,
        last_error: None,
    };
    if let Err(e) = state.store.upsert_source(&source).await {
        return ApiError::Internal(e.to_string()).respond(&ctx.request_id);
    }
    state.registry.register_source(source.clone());
    state.registry.refresh(&source.source_id).await;
    success(StatusCode::CREATED, &ctx.request_id, source)
}

pub async fn remove_source(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(source_id): Path<String>,
) -> Response {
    if state.registry.remove_source(&source_id).is_none() {
        return ApiError::NotFound(source_id).respond(&ctx.request_id);
    }
    if let Err(e) = state.store.remove_source(&source_id).await {
        return ApiError::Internal(e.to_string()).respond(&ctx.request_id);
    }
    success(StatusCode::OK, &ctx.request_id, json!({ "sourceId": source_id }))
}

pub async fn toggle_source(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(source_id): Path<String>,
) -> Response {
    let Some(current) = state.registry.sources().into_iter().find(|s| s.source_id == source_id) else {
        return ApiError::NotFound(source_id).respond(&ctx.request_id);
    };
    let enabled = !current.enabled;
    state.registry.set_enabled(&source_id, enabled);
    let mut updated = current;
    updated.enabled = enabled;
    if let Err(e) = state.store.upsert_source(&updated).await {
        return ApiError::Internal(e.to_string()).respond(&ctx.request_id);
    }
    success(StatusCode::OK, &ctx.request_id, updated)
}

pub async fn refresh_source(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
    Path(source_id): Path<String>,
) -> Response {
    state.registry.refresh(&source_id).await;
    let Some(updated) = state.registry.sources().into_iter().find(|s| s.source_id == source_id) else {
        return ApiError::NotFound(source_id).respond(&ctx.request_id);
    };
    let _ = state.store.upsert_source(&updated).await;
    success(StatusCode::OK, &ctx.request_id, updated)
}

pub async fn refresh_all_sources(
    State(state): State<AppState>,
    ctx: Extension<RequestContext>,
) -> Response {
    state.registry.refresh_all().await;
    let sources = state.registry.sources();
    for source in &sources {
        let _ = state.store.upsert_source(source).await;
    }
    success(StatusCode::OK, &ctx.request_id, json!({ "sources": sources }))
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let daemon_ok = state
        .container_driver
        .list_managed_containers(&state.config.orchestrator.container_name_prefix)
        .await
        .is_ok();
    let store_ok = state.store.get_used_host_ports().await.is_ok();
    let status = if daemon_ok && store_ok { "healthy" } else { "degraded" };
    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "daemon": if daemon_ok { "reachable" } else { "unreachable" },
            "store": if store_ok { "reachable" } else { "unreachable" },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// §4.7: the API surface reports not-ready until cold-start reconciliation
/// has finished, so a load balancer doesn't route to a half-reconciled
/// instance.
pub async fn ready_check(State(state): State<AppState>) -> Response {
    if state.reconciled.load(std::sync::atomic::Ordering::Acquire) {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "reconciling" })),
        )
            .into_response()
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = metrics::render(&state.store, &state.event_bus).await;
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn ws_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_event_socket(socket, state))
}

async fn handle_event_socket(mut socket: WebSocket, state: AppState) {
    let subscription = state.event_bus.subscribe();
    loop {
        tokio::select! {
            event = subscription.next() => {
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
