//! HTTP-facing error type (§7). Named `ApiError` rather than the teacher's
//! `GatewayError` to avoid colliding with this system's own "gateway" — the
//! external API gateway the Gateway Publisher pushes state to.
//!
//! Grounded on `ultrafast-gateway/src/gateway_error.rs`: a `thiserror` enum
//! with one `IntoResponse` impl matching every variant onto a status code
//! and machine-readable `code`, wrapped in the envelope §6 specifies instead
//! of the teacher's flatter `{error: {message, type, code}}` shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowforge_runtime::RuntimeError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid manifest")]
    InvalidManifest(Vec<flowforge_runtime::error::FieldProblem>),

    #[error("plugin already installed: {0}")]
    AlreadyInstalled(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("plugin busy: {0}")]
    Busy(String),

    #[error("port in use")]
    PortInUse,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("gateway publish failed: {0}")]
    GatewayFailure(String),

    #[error("registry fetch failed: {0}")]
    RegistryFetchFailed(String),

    #[error("no port available")]
    NoPortAvailable,

    #[error("package too large")]
    PackageTooLarge,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::InvalidManifest(problems) => ApiError::InvalidManifest(problems),
            RuntimeError::InvalidResource(msg) => ApiError::ValidationError(msg),
            RuntimeError::ImagePullFailed(msg) => ApiError::ImagePullFailed(msg),
            RuntimeError::RuntimeUnavailable(msg) => ApiError::RuntimeUnavailable(msg),
            RuntimeError::ContainerNotFound(msg) => ApiError::NotFound(msg),
            RuntimeError::GatewayFailure(msg) => ApiError::GatewayFailure(msg),
            RuntimeError::RegistryFetchFailed { source_id, message } => {
                ApiError::RegistryFetchFailed(format!("{source_id}: {message}"))
            }
            RuntimeError::Package(msg) => ApiError::PackageTooLarge.tap_msg(msg),
            RuntimeError::Http(e) => ApiError::RuntimeUnavailable(e.to_string()),
            RuntimeError::Serialization(e) => ApiError::ValidationError(e.to_string()),
            RuntimeError::Archive(msg) => ApiError::ValidationError(msg),
            RuntimeError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl ApiError {
    /// Package errors fold two distinct client-facing codes
    /// (`PackageTooLarge` vs. a generic validation problem) into one
    /// `RuntimeError::Package` variant; recover the right one from the
    /// message text the runtime layer set.
    fn tap_msg(self, msg: String) -> Self {
        if msg.contains("2 GiB") {
            ApiError::PackageTooLarge
        } else {
            ApiError::ValidationError(msg)
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidManifest(_) => "InvalidManifest",
            ApiError::AlreadyInstalled(_) => "AlreadyInstalled",
            ApiError::NotFound(_) => "NotFound",
            ApiError::InvalidTransition(_) => "InvalidTransition",
            ApiError::Busy(_) => "Busy",
            ApiError::PortInUse => "PortInUse",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::ImagePullFailed(_) => "ImagePullFailed",
            ApiError::RuntimeUnavailable(_) => "RuntimeUnavailable",
            ApiError::GatewayFailure(_) => "GatewayFailure",
            ApiError::RegistryFetchFailed(_) => "RegistryFetchFailed",
            ApiError::NoPortAvailable => "NoPortAvailable",
            ApiError::PackageTooLarge => "PackageTooLarge",
            ApiError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidManifest(_)
            | ApiError::ValidationError(_)
            | ApiError::PortInUse
            | ApiError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyInstalled(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy(_) => StatusCode::CONFLICT,
            ApiError::NoPortAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PackageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ImagePullFailed(_)
            | ApiError::RuntimeUnavailable(_)
            | ApiError::GatewayFailure(_)
            | ApiError::RegistryFetchFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::InvalidManifest(problems) => Some(json!(problems)),
            _ => None,
        }
    }

    /// Builds the §7 error envelope with the request's real `requestId`.
    /// Handlers should call this rather than relying on `IntoResponse`,
    /// which has no request context to draw from.
    pub fn respond(self, request_id: &str) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "details": self.details(),
            },
            "requestId": request_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "details": self.details(),
            },
            "requestId": serde_json::Value::Null,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}
