//! Idempotent publisher of upstream services, routes, rate-limit and CORS
//! policy to an external API gateway (§4.5).
//!
//! Grounded on the same `HttpAdapter` wrapper the Container Driver uses
//! (`ultrafast-models-sdk/src/providers/http_client.rs`'s shape), pointed at
//! the gateway's admin API instead of the daemon. Failures here never
//! propagate to the caller as a hard error — per §4.5 and §7, gateway
//! failures are logged and surfaced as `plugin:warning`, never block the
//! lifecycle.

use crate::error::Result;
use crate::http::HttpAdapter;
use crate::model::Manifest;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

#[async_trait]
pub trait GatewayPublisher: Send + Sync {
    /// Ensure the upstream service, route, rate-limit, and CORS policy for a
    /// plugin that just entered `running` exist and match its manifest.
    async fn publish(&self, manifest: &Manifest, container_name: &str) -> Result<()>;

    /// Remove the route first, then the upstream service, for a plugin that
    /// left `running` (§4.5: "routes for the service are removed first").
    async fn unpublish(&self, manifest_id: &str) -> Result<()>;
}

/// Derives the deterministic gateway-facing names from a `manifestId`.
fn service_name(manifest_id: &str) -> String {
    format!("plugin-{manifest_id}")
}

fn route_name(manifest_id: &str) -> String {
    format!("plugin-{manifest_id}-route")
}

#[derive(Serialize)]
struct UpstreamService<'a> {
    name: &'a str,
    host: &'a str,
    port: u16,
    connect_timeout_ms: u64,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

#[derive(Serialize)]
struct Route<'a> {
    name: &'a str,
    service: &'a str,
    paths: Vec<String>,
    strip_path: bool,
    protocols: Vec<&'static str>,
}

#[derive(Serialize)]
struct RateLimitPolicy<'a> {
    route: &'a str,
    requests_per_minute: u32,
}

#[derive(Serialize)]
struct CorsPolicy<'a> {
    route: &'a str,
}

pub struct HttpGatewayPublisher {
    http: HttpAdapter,
}

impl HttpGatewayPublisher {
    pub fn new(admin_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: HttpAdapter::new(admin_url, Duration::from_secs(10))?,
        })
    }
}

#[async_trait]
impl GatewayPublisher for HttpGatewayPublisher {
    async fn publish(&self, manifest: &Manifest, container_name: &str) -> Result<()> {
        let service = service_name(&manifest.id);
        self.http
            .put_json::<_, serde_json::Value>(
                &format!("/services/{service}"),
                &UpstreamService {
                    name: &service,
                    host: container_name,
                    port: manifest.network.container_port,
                    connect_timeout_ms: 5_000,
                    read_timeout_ms: 30_000,
                    write_timeout_ms: 30_000,
                },
            )
            .await?;

        let route = route_name(&manifest.id);
        self.http
            .put_json::<_, serde_json::Value>(
                &format!("/routes/{route}"),
                &Route {
                    name: &route,
                    service: &service,
                    paths: vec![manifest.effective_base_path()],
                    strip_path: true,
                    protocols: vec!["http", "https"],
                },
            )
            .await?;

        let rate_limit_per_minute = manifest
            .endpoints
            .iter()
            .filter_map(|e| e.rate_limit)
            .min()
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);
        self.http
            .put_json::<_, serde_json::Value>(
                &format!("/routes/{route}/rate-limit"),
                &RateLimitPolicy {
                    route: &route,
                    requests_per_minute: rate_limit_per_minute,
                },
            )
            .await?;

        self.http
            .put_json::<_, serde_json::Value>(
                &format!("/routes/{route}/cors"),
                &CorsPolicy { route: &route },
            )
            .await?;

        Ok(())
    }

    async fn unpublish(&self, manifest_id: &str) -> Result<()> {
        let route = route_name(manifest_id);
        let service = service_name(manifest_id);
        self.http.delete(&format!("/routes/{route}")).await?;
        self.http.delete(&format!("/services/{service}")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_names_are_stable_across_calls() {
        assert_eq!(service_name("crypto"), service_name("crypto"));
        assert_eq!(service_name("crypto"), "plugin-crypto");
        assert_eq!(route_name("crypto"), "plugin-crypto-route");
    }
}
