//! `ContainerDriver`: the trait abstraction the Lifecycle Engine programs
//! against (per §9's "model each singleton as an interface abstraction, one
//! production implementation"), plus `DaemonContainerDriver`, its HTTP
//! implementation over the container daemon's remote API.

use crate::container::spec::{
    ContainerHandle, ContainerInspection, ContainerSpec, ContainerSummary,
};
use crate::error::{Result, RuntimeError};
use crate::http::HttpAdapter;
use async_trait::async_trait;
use std::time::Duration;

/// Explicit per-operation timeouts (§5): pull 10 min, start/stop 2 min,
/// inspect 10 s.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(600);
pub const START_STOP_TIMEOUT: Duration = Duration::from_secs(120);
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations over the container daemon (§4.3). One production
/// implementation (`DaemonContainerDriver`); tests substitute a fake.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn pull_image(&self, repository: &str, tag: &str) -> Result<()>;
    async fn image_exists(&self, image_ref: &str) -> Result<bool>;
    async fn ensure_network(&self, name: &str) -> Result<()>;
    async fn ensure_volume(&self, logical_name: &str) -> Result<String>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;
    async fn start_container(&self, handle: &ContainerHandle) -> Result<()>;
    async fn stop_container(&self, handle: &ContainerHandle, grace_period_seconds: u32) -> Result<()>;
    async fn remove_container(&self, handle: &ContainerHandle, force: bool) -> Result<()>;
    async fn inspect_container(&self, handle: &ContainerHandle) -> Result<ContainerInspection>;
    async fn tail_logs(&self, handle: &ContainerHandle, line_count: u32) -> Result<Vec<u8>>;
    async fn list_managed_containers(&self, name_prefix: &str) -> Result<Vec<ContainerSummary>>;
}

/// HTTP adapter over the container daemon's remote API.
///
/// Grounded on `ultrafast-models-sdk/src/providers/http_client.rs`'s
/// `HttpProviderClient`: one `reqwest`-backed struct per remote collaborator,
/// JSON in, JSON out, errors mapped through a shared helper.
pub struct DaemonContainerDriver {
    http: HttpAdapter,
    volume_prefix: String,
}

impl DaemonContainerDriver {
    pub fn new(daemon_endpoint: impl Into<String>, volume_prefix: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: HttpAdapter::new(daemon_endpoint, INSPECT_TIMEOUT)?,
            volume_prefix: volume_prefix.into(),
        })
    }
}

#[async_trait]
impl ContainerDriver for DaemonContainerDriver {
    async fn pull_image(&self, repository: &str, tag: &str) -> Result<()> {
        #[derive(serde::Serialize)]
        struct PullRequest<'a> {
            repository: &'a str,
            tag: &'a str,
        }
        self.http
            .post_json_with_timeout::<_, serde_json::Value>(
                "/images/pull",
                &PullRequest { repository, tag },
                Some(PULL_TIMEOUT),
            )
            .await
            .map_err(|e| RuntimeError::ImagePullFailed(e.to_string()))?;
        Ok(())
    }

    async fn image_exists(&self, image_ref: &str) -> Result<bool> {
        #[derive(serde::Deserialize)]
        struct ExistsResponse {
            exists: bool,
        }
        let resp: ExistsResponse = self
            .http
            .get_json(&format!("/images/{}/exists", urlencode(image_ref)))
            .await?;
        Ok(resp.exists)
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        #[derive(serde::Serialize)]
        struct EnsureNetworkRequest<'a> {
            name: &'a str,
        }
        self.http
            .post_json::<_, serde_json::Value>("/networks/ensure", &EnsureNetworkRequest { name })
            .await?;
        Ok(())
    }

    async fn ensure_volume(&self, logical_name: &str) -> Result<String> {
        let volume_name = format!("{}{}", self.volume_prefix, logical_name);
        #[derive(serde::Serialize)]
        struct EnsureVolumeRequest<'a> {
            name: &'a str,
        }
        self.http
            .post_json::<_, serde_json::Value>(
                "/volumes/ensure",
                &EnsureVolumeRequest { name: &volume_name },
            )
            .await?;
        Ok(volume_name)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        #[derive(serde::Deserialize)]
        struct CreateResponse {
            handle: String,
        }
        let resp: CreateResponse = self.http.post_json("/containers", spec).await?;
        Ok(resp.handle)
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.http
            .post_json_with_timeout::<_, serde_json::Value>(
                &format!("/containers/{}/start", handle),
                &serde_json::json!({}),
                Some(START_STOP_TIMEOUT),
            )
            .await?;
        Ok(())
    }

    async fn stop_container(&self, handle: &ContainerHandle, grace_period_seconds: u32) -> Result<()> {
        #[derive(serde::Serialize)]
        struct StopRequest {
            grace_period_seconds: u32,
        }
        self.http
            .post_json_with_timeout::<_, serde_json::Value>(
                &format!("/containers/{}/stop", handle),
                &StopRequest {
                    grace_period_seconds,
                },
                Some(START_STOP_TIMEOUT),
            )
            .await?;
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle, force: bool) -> Result<()> {
        self.http
            .delete(&format!("/containers/{}?force={}", handle, force))
            .await
    }

    async fn inspect_container(&self, handle: &ContainerHandle) -> Result<ContainerInspection> {
        self.http
            .get_json(&format!("/containers/{}/inspect", handle))
            .await
    }

    async fn tail_logs(&self, handle: &ContainerHandle, line_count: u32) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get_bytes(&format!("/containers/{}/logs?tail={}", handle, line_count))
            .await?;
        Ok(bytes.to_vec())
    }

    async fn list_managed_containers(&self, name_prefix: &str) -> Result<Vec<ContainerSummary>> {
        self.http
            .get_json(&format!("/containers?prefix={}", urlencode(name_prefix)))
            .await
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/' {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_leaves_slugs_untouched() {
        assert_eq!(urlencode("flowforge/crypto:1.0.0"), "flowforge/crypto%3A1.0.0");
    }
}
