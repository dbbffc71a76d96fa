//! Polymorphic source fetcher (§4.8, §9): `SourceKind::{HttpIndex,
//! SourceHosting}` plus a `fetch` operation. Adding a new source kind is a
//! new arm here, not a new subtype hierarchy — mirrors
//! `ultrafast-models-sdk/src/providers/mod.rs`'s one-struct-per-provider,
//! uniform-trait-surface shape.

use crate::error::{Result, RuntimeError};
use crate::http::HttpAdapter;
use crate::model::{CatalogEntry, Manifest, SourceKind};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A single http-index document (§4.8): `{ version, registry: { name },
/// plugins: [...] }`. Unknown top-level fields are ignored by `serde`
/// default (no `deny_unknown_fields`); malformed entries are dropped
/// individually by `HttpIndexEntry`'s optional-manifest shape.
#[derive(Debug, Deserialize)]
struct HttpIndexDocument {
    #[allow(dead_code)]
    version: Option<String>,
    registry: RegistryMeta,
    plugins: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RegistryMeta {
    #[allow(dead_code)]
    name: String,
}

/// A `manifest.json` resolved from a source-hosting repository's default
/// branch.
#[derive(Debug, Deserialize)]
struct SourceHostingManifest {
    manifest: Manifest,
    #[serde(default)]
    downloads: Option<u64>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    featured: bool,
}

/// Fetch the catalog entries exposed by one source, given its kind and URL.
/// Malformed individual entries are dropped with a warning rather than
/// failing the whole fetch (§4.8).
pub async fn fetch(source_id: &str, kind: SourceKind, url: &str) -> Result<Vec<CatalogEntry>> {
    let http = HttpAdapter::new(base_url(url), FETCH_TIMEOUT)?;
    match kind {
        SourceKind::HttpIndex => fetch_http_index(source_id, &http, path(url)).await,
        SourceKind::SourceHosting => fetch_source_hosting(source_id, &http, path(url)).await,
    }
}

/// Split a full URL into `(scheme://host[:port], /path)` so `HttpAdapter`
/// (which concatenates base + path) can be reused uniformly for both kinds.
fn base_url(url: &str) -> String {
    if let Some(idx) = url.find("://").map(|i| i + 3) {
        if let Some(slash) = url[idx..].find('/') {
            return url[..idx + slash].to_string();
        }
    }
    url.to_string()
}

fn path(url: &str) -> &str {
    if let Some(idx) = url.find("://").map(|i| i + 3) {
        if let Some(slash) = url[idx..].find('/') {
            return &url[idx + slash..];
        }
    }
    "/"
}

async fn fetch_http_index(
    source_id: &str,
    http: &HttpAdapter,
    path: &str,
) -> Result<Vec<CatalogEntry>> {
    let doc: HttpIndexDocument = http.get_json(path).await.map_err(|e| {
        RuntimeError::RegistryFetchFailed {
            source_id: source_id.to_string(),
            message: e.to_string(),
        }
    })?;

    let now = Utc::now();
    let mut entries = Vec::new();
    for raw in doc.plugins {
        match serde_json::from_value::<RawCatalogEntry>(raw) {
            Ok(parsed) => entries.push(CatalogEntry {
                source_id: source_id.to_string(),
                manifest: parsed.manifest,
                downloads: parsed.downloads,
                rating: parsed.rating,
                verified: parsed.verified,
                featured: parsed.featured,
                published_at: parsed.published_at.unwrap_or(now),
                updated_at: parsed.updated_at.unwrap_or(now),
            }),
            Err(e) => {
                tracing::warn!(source_id, error = %e, "dropping malformed catalog entry");
            }
        }
    }
    Ok(entries)
}

#[derive(Debug, Deserialize)]
struct RawCatalogEntry {
    manifest: Manifest,
    #[serde(default)]
    downloads: Option<u64>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    featured: bool,
    #[serde(default)]
    published_at: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<Utc>>,
}

async fn fetch_source_hosting(
    source_id: &str,
    http: &HttpAdapter,
    repo_path: &str,
) -> Result<Vec<CatalogEntry>> {
    let manifest_path = format!("{}/manifest.json", repo_path.trim_end_matches('/'));
    let doc: SourceHostingManifest =
        http.get_json(&manifest_path)
            .await
            .map_err(|e| RuntimeError::RegistryFetchFailed {
                source_id: source_id.to_string(),
                message: e.to_string(),
            })?;

    let now = Utc::now();
    Ok(vec![CatalogEntry {
        source_id: source_id.to_string(),
        manifest: doc.manifest,
        downloads: doc.downloads,
        rating: doc.rating,
        verified: doc.verified,
        featured: doc.featured,
        published_at: now,
        updated_at: now,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_base_and_path() {
        assert_eq!(base_url("https://reg.example.com/plugins.json"), "https://reg.example.com");
        assert_eq!(path("https://reg.example.com/plugins.json"), "/plugins.json");
    }

    #[test]
    fn handles_url_with_no_path() {
        assert_eq!(base_url("https://reg.example.com"), "https://reg.example.com");
        assert_eq!(path("https://reg.example.com"), "/");
    }
}
