//! The Persistent Store (§4.1): transactional CRUD over `PluginInstance`,
//! `LifecycleEvent`, `SourceRegistration`, `UpdateHistoryEntry`, backed by
//! Postgres.
//!
//! Grounded on `meridian-db` (harborgrid-justin-esxi pack) for the `sqlx`
//! connection-pool-plus-migration shape — the teacher has no relational
//! store of its own. Queries use `sqlx::query`/`query_as` at runtime rather
//! than the `query!` compile-time macros, since there is no live database to
//! check against during this build; manifest/config/env payloads are stored
//! as `JSONB` rather than normalized into columns, matching how the data
//! model already treats them as opaque blobs (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use flowforge_runtime::model::{
    EventKind, HealthState, LifecycleEvent, Manifest, PluginInstance, PluginStatus,
    SourceRegistration, SourceKind, UpdateAction, UpdateHistoryEntry,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use thiserror::Error;

use crate::config::StoreConfig;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("duplicate manifest id: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter for `list_plugins` (§4.1: "`filter` ∈ { status?, manifestIds? }").
#[derive(Debug, Clone, Default)]
pub struct PluginFilter {
    pub status: Option<PluginStatus>,
    pub manifest_ids: Option<Vec<String>>,
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_url())
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert or update by `manifestId` (§4.1).
    pub async fn upsert_plugin(&self, instance: &PluginInstance) -> Result<()> {
        let manifest = serde_json::to_value(&instance.manifest)?;
        let effective_config = serde_json::to_value(&instance.effective_config)?;
        let effective_env = serde_json::to_value(&instance.effective_env)?;

        let previous_manifest = instance
            .previous_manifest
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO plugins (
                plugin_key, manifest_id, manifest, status, container_handle,
                container_name, allocated_host_port, effective_config,
                effective_env, installed_at, started_at, stopped_at,
                last_probe_at, health_state, last_error, previous_manifest
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (plugin_key) DO UPDATE SET
                manifest = EXCLUDED.manifest,
                status = EXCLUDED.status,
                container_handle = EXCLUDED.container_handle,
                container_name = EXCLUDED.container_name,
                allocated_host_port = EXCLUDED.allocated_host_port,
                effective_config = EXCLUDED.effective_config,
                effective_env = EXCLUDED.effective_env,
                started_at = EXCLUDED.started_at,
                stopped_at = EXCLUDED.stopped_at,
                last_probe_at = EXCLUDED.last_probe_at,
                health_state = EXCLUDED.health_state,
                last_error = EXCLUDED.last_error,
                previous_manifest = EXCLUDED.previous_manifest
            "#,
        )
        .bind(&instance.plugin_key)
        .bind(&instance.manifest_id)
        .bind(manifest)
        .bind(status_str(instance.status))
        .bind(&instance.container_handle)
        .bind(&instance.container_name)
        .bind(instance.allocated_host_port.map(i32::from))
        .bind(effective_config)
        .bind(effective_env)
        .bind(instance.installed_at)
        .bind(instance.started_at)
        .bind(instance.stopped_at)
        .bind(instance.last_probe_at)
        .bind(health_state_str(instance.health_state))
        .bind(&instance.last_error)
        .bind(previous_manifest)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(instance.manifest_id.clone())
            }
            _ => StoreError::from(e),
        })?;

        Ok(())
    }

    /// Partial update, silently no-oping on an absent key (§4.1).
    pub async fn patch_plugin(
        &self,
        plugin_key: &str,
        status: Option<PluginStatus>,
        container_handle: Option<Option<String>>,
        health_state: Option<HealthState>,
        last_error: Option<Option<String>>,
    ) -> Result<bool> {
        let existing = self.get_plugin(plugin_key).await?;
        let Some(mut instance) = existing else {
            return Ok(false);
        };

        if let Some(status) = status {
            instance.status = status;
            if status == PluginStatus::Running && instance.started_at.is_none() {
                instance.started_at = Some(Utc::now());
            }
            if status == PluginStatus::Stopped && instance.stopped_at.is_none() {
                instance.stopped_at = Some(Utc::now());
            }
        }
        if let Some(handle) = container_handle {
            instance.container_handle = handle;
        }
        if let Some(health) = health_state {
            instance.health_state = health;
            instance.last_probe_at = Some(Utc::now());
        }
        if let Some(err) = last_error {
            instance.last_error = err;
        }

        self.upsert_plugin(&instance).await?;
        Ok(true)
    }

    pub async fn get_plugin(&self, plugin_key: &str) -> Result<Option<PluginInstance>> {
        let row: Option<PluginRow> =
            sqlx::query_as("SELECT * FROM plugins WHERE plugin_key = $1")
                .bind(plugin_key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PluginInstance::try_from).transpose()
    }

    pub async fn get_plugin_by_manifest_id(
        &self,
        manifest_id: &str,
    ) -> Result<Option<PluginInstance>> {
        let row: Option<PluginRow> =
            sqlx::query_as("SELECT * FROM plugins WHERE manifest_id = $1")
                .bind(manifest_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PluginInstance::try_from).transpose()
    }

    /// Ordered by `installedAt` descending (§4.1).
    pub async fn list_plugins(&self, filter: &PluginFilter) -> Result<Vec<PluginInstance>> {
        let rows: Vec<PluginRow> = sqlx::query_as(
            "SELECT * FROM plugins
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text[] IS NULL OR manifest_id = ANY($2))
             ORDER BY installed_at DESC",
        )
        .bind(filter.status.map(status_str))
        .bind(filter.manifest_ids.clone())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PluginInstance::try_from).collect()
    }

    pub async fn remove_plugin(&self, plugin_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM plugins WHERE plugin_key = $1")
            .bind(plugin_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_used_host_ports(&self) -> Result<Vec<u16>> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            "SELECT allocated_host_port FROM plugins WHERE allocated_host_port IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p as u16).collect())
    }

    /// Non-blocking from the caller's perspective; append failures are
    /// logged by the caller rather than cascaded (§4.1).
    pub async fn append_event(&self, event: &LifecycleEvent) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO plugin_events (plugin_key, kind, "timestamp", payload)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(&event.plugin_key)
        .bind(event_kind_str(event.kind))
        .bind(event.timestamp)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_events(&self, plugin_key: &str, limit: i64) -> Result<Vec<LifecycleEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"SELECT plugin_key, kind, "timestamp", payload FROM plugin_events
               WHERE plugin_key = $1 ORDER BY "timestamp" DESC LIMIT $2"#,
        )
        .bind(plugin_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LifecycleEvent::try_from).collect()
    }

    pub async fn record_update(&self, entry: &UpdateHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO plugin_updates (plugin_key, from_version, to_version, action, actor, "timestamp")
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&entry.plugin_key)
        .bind(&entry.from_version)
        .bind(&entry.to_version)
        .bind(update_action_str(entry.action))
        .bind(&entry.actor)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_history(&self, plugin_key: &str) -> Result<Vec<UpdateHistoryEntry>> {
        let rows: Vec<UpdateRow> = sqlx::query_as(
            r#"SELECT plugin_key, from_version, to_version, action, actor, "timestamp"
               FROM plugin_updates WHERE plugin_key = $1 ORDER BY "timestamp" DESC"#,
        )
        .bind(plugin_key)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UpdateHistoryEntry::try_from).collect()
    }

    pub async fn upsert_source(&self, source: &SourceRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plugin_sources (source_id, name, url, kind, enabled, priority, is_default, last_fetched_at, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_id) DO UPDATE SET
                name = EXCLUDED.name,
                url = EXCLUDED.url,
                kind = EXCLUDED.kind,
                enabled = EXCLUDED.enabled,
                priority = EXCLUDED.priority,
                is_default = EXCLUDED.is_default,
                last_fetched_at = EXCLUDED.last_fetched_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(&source.source_id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(source_kind_str(source.kind))
        .bind(source.enabled)
        .bind(source.priority)
        .bind(source.is_default)
        .bind(source.last_fetched_at)
        .bind(&source.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM plugin_sources WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceRegistration>> {
        let rows: Vec<SourceRow> = sqlx::query_as("SELECT * FROM plugin_sources ORDER BY priority")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SourceRegistration::try_from).collect()
    }
}

#[derive(FromRow)]
struct PluginRow {
    plugin_key: String,
    manifest_id: String,
    manifest: Value,
    status: String,
    container_handle: Option<String>,
    container_name: String,
    allocated_host_port: Option<i32>,
    effective_config: Value,
    effective_env: Value,
    installed_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    last_probe_at: Option<DateTime<Utc>>,
    health_state: String,
    last_error: Option<String>,
    previous_manifest: Option<Value>,
}

impl TryFrom<PluginRow> for PluginInstance {
    type Error = StoreError;

    fn try_from(row: PluginRow) -> Result<Self> {
        let manifest: Manifest = serde_json::from_value(row.manifest)?;
        let effective_config: HashMap<String, Value> = serde_json::from_value(row.effective_config)?;
        let effective_env: HashMap<String, String> = serde_json::from_value(row.effective_env)?;
        let previous_manifest = row
            .previous_manifest
            .map(serde_json::from_value)
            .transpose()?;

        Ok(PluginInstance {
            plugin_key: row.plugin_key,
            manifest_id: row.manifest_id,
            manifest,
            status: parse_status(&row.status)?,
            container_handle: row.container_handle,
            container_name: row.container_name,
            allocated_host_port: row.allocated_host_port.map(|p| p as u16),
            effective_config,
            effective_env,
            installed_at: row.installed_at,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            last_probe_at: row.last_probe_at,
            health_state: parse_health_state(&row.health_state)?,
            last_error: row.last_error,
            previous_manifest,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    plugin_key: String,
    kind: String,
    timestamp: DateTime<Utc>,
    payload: Value,
}

impl TryFrom<EventRow> for LifecycleEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(LifecycleEvent {
            plugin_key: row.plugin_key,
            kind: parse_event_kind(&row.kind)?,
            timestamp: row.timestamp,
            payload: row.payload,
        })
    }
}

#[derive(FromRow)]
struct UpdateRow {
    plugin_key: String,
    from_version: String,
    to_version: String,
    action: String,
    actor: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<UpdateRow> for UpdateHistoryEntry {
    type Error = StoreError;

    fn try_from(row: UpdateRow) -> Result<Self> {
        Ok(UpdateHistoryEntry {
            plugin_key: row.plugin_key,
            from_version: row.from_version,
            to_version: row.to_version,
            action: parse_update_action(&row.action)?,
            actor: row.actor,
            timestamp: row.timestamp,
        })
    }
}

#[derive(FromRow)]
struct SourceRow {
    source_id: String,
    name: String,
    url: String,
    kind: String,
    enabled: bool,
    priority: i32,
    is_default: bool,
    last_fetched_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<SourceRow> for SourceRegistration {
    type Error = StoreError;

    fn try_from(row: SourceRow) -> Result<Self> {
        Ok(SourceRegistration {
            source_id: row.source_id,
            name: row.name,
            url: row.url,
            kind: parse_source_kind(&row.kind)?,
            enabled: row.enabled,
            priority: row.priority,
            is_default: row.is_default,
            last_fetched_at: row.last_fetched_at,
            last_error: row.last_error,
        })
    }
}

fn status_str(status: PluginStatus) -> &'static str {
    match status {
        PluginStatus::Installing => "installing",
        PluginStatus::Installed => "installed",
        PluginStatus::Starting => "starting",
        PluginStatus::Running => "running",
        PluginStatus::Stopping => "stopping",
        PluginStatus::Stopped => "stopped",
        PluginStatus::Error => "error",
        PluginStatus::Uninstalling => "uninstalling",
    }
}

fn parse_status(s: &str) -> Result<PluginStatus> {
    Ok(match s {
        "installing" => PluginStatus::Installing,
        "installed" => PluginStatus::Installed,
        "starting" => PluginStatus::Starting,
        "running" => PluginStatus::Running,
        "stopping" => PluginStatus::Stopping,
        "stopped" => PluginStatus::Stopped,
        "error" => PluginStatus::Error,
        "uninstalling" => PluginStatus::Uninstalling,
        other => return Err(StoreError::Storage(sqlx::Error::Decode(
            format!("unknown plugin status: {other}").into(),
        ))),
    })
}

fn health_state_str(state: HealthState) -> &'static str {
    match state {
        HealthState::Healthy => "healthy",
        HealthState::Unhealthy => "unhealthy",
        HealthState::Unknown => "unknown",
    }
}

fn parse_health_state(s: &str) -> Result<HealthState> {
    Ok(match s {
        "healthy" => HealthState::Healthy,
        "unhealthy" => HealthState::Unhealthy,
        "unknown" => HealthState::Unknown,
        other => {
            return Err(StoreError::Storage(sqlx::Error::Decode(
                format!("unknown health state: {other}").into(),
            )))
        }
    })
}

fn event_kind_str(kind: EventKind) -> &'static str {
    match kind {
        EventKind::PluginInstalling => "plugin_installing",
        EventKind::PluginInstalled => "plugin_installed",
        EventKind::PluginStarting => "plugin_starting",
        EventKind::PluginStarted => "plugin_started",
        EventKind::PluginStopping => "plugin_stopping",
        EventKind::PluginStopped => "plugin_stopped",
        EventKind::PluginError => "plugin_error",
        EventKind::PluginHealth => "plugin_health",
        EventKind::PluginWarning => "plugin_warning",
        EventKind::PluginUninstalling => "plugin_uninstalling",
        EventKind::PluginUninstalled => "plugin_uninstalled",
    }
}

fn parse_event_kind(s: &str) -> Result<EventKind> {
    Ok(match s {
        "plugin_installing" => EventKind::PluginInstalling,
        "plugin_installed" => EventKind::PluginInstalled,
        "plugin_starting" => EventKind::PluginStarting,
        "plugin_started" => EventKind::PluginStarted,
        "plugin_stopping" => EventKind::PluginStopping,
        "plugin_stopped" => EventKind::PluginStopped,
        "plugin_error" => EventKind::PluginError,
        "plugin_health" => EventKind::PluginHealth,
        "plugin_warning" => EventKind::PluginWarning,
        "plugin_uninstalling" => EventKind::PluginUninstalling,
        "plugin_uninstalled" => EventKind::PluginUninstalled,
        other => {
            return Err(StoreError::Storage(sqlx::Error::Decode(
                format!("unknown event kind: {other}").into(),
            )))
        }
    })
}

fn update_action_str(action: UpdateAction) -> &'static str {
    match action {
        UpdateAction::Install => "install",
        UpdateAction::Update => "update",
        UpdateAction::Rollback => "rollback",
    }
}

fn parse_update_action(s: &str) -> Result<UpdateAction> {
    Ok(match s {
        "install" => UpdateAction::Install,
        "update" => UpdateAction::Update,
        "rollback" => UpdateAction::Rollback,
        other => {
            return Err(StoreError::Storage(sqlx::Error::Decode(
                format!("unknown update action: {other}").into(),
            )))
        }
    })
}

fn source_kind_str(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::HttpIndex => "http-index",
        SourceKind::SourceHosting => "source-hosting",
    }
}

fn parse_source_kind(s: &str) -> Result<SourceKind> {
    Ok(match s {
        "http-index" => SourceKind::HttpIndex,
        "source-hosting" => SourceKind::SourceHosting,
        other => {
            return Err(StoreError::Storage(sqlx::Error::Decode(
                format!("unknown source kind: {other}").into(),
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_wire_string() {
        for status in [
            PluginStatus::Installing,
            PluginStatus::Installed,
            PluginStatus::Starting,
            PluginStatus::Running,
            PluginStatus::Stopping,
            PluginStatus::Stopped,
            PluginStatus::Error,
            PluginStatus::Uninstalling,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn event_kind_round_trips_through_its_wire_string() {
        for kind in [
            EventKind::PluginInstalling,
            EventKind::PluginInstalled,
            EventKind::PluginHealth,
            EventKind::PluginUninstalled,
        ] {
            assert_eq!(parse_event_kind(event_kind_str(kind)).unwrap(), kind);
        }
    }

    #[test]
    fn rejects_an_unknown_status_string() {
        assert!(parse_status("quantum-superposition").is_err());
    }
}
