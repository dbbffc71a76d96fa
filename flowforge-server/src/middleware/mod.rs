//! HTTP middleware: request-ID injection/logging and CORS. There is no
//! authentication layer (§1 explicit non-goal — no SSO/identity layer) and
//! no dynamic request/response modification layer; the full stack is just
//! what §11/§12 ask for: structured per-request logging and a permissive
//! CORS policy, since the external API gateway (not this process) is the
//! system's actual edge.
//!
//! Grounded on `ultrafast-gateway::middleware`'s logging middleware, trimmed
//! of `auth_middleware` and the `input_validation`/`plugin_middleware`
//! submodules it composed with.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::request_context::RequestContext;
use crate::server::AppState;

/// Generates or copies a request ID from `X-Request-ID`, stashes a
/// `RequestContext` in the request's extensions for downstream handlers, and
/// logs method/URI/status/latency once the response is ready (§6, §12).
pub async fn logging_middleware(
    State(_state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let context = match req.headers().get("x-request-id").and_then(|h| h.to_str().ok()) {
        Some(id) => RequestContext::with_request_id(id.to_string()),
        None => RequestContext::new(),
    };
    let request_id = context.request_id.clone();
    req.extensions_mut().insert(context);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("x-request-id", request_id.parse().unwrap());

    let latency = start.elapsed();
    let status = response.status();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        latency_ms = latency.as_millis(),
        "request processed",
    );

    response
}

/// A permissive CORS policy: the external API gateway is this system's
/// actual edge (§1), so there's no per-deployment origin allowlist to carry
/// here, unlike the teacher's config-driven `CorsConfig`.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
