//! Error types for the runtime adapters: manifest validation, resource
//! string parsing, the container driver, the registry aggregator, and the
//! gateway publisher.

use thiserror::Error;

/// One validation failure against a single manifest field.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldProblem {
    pub field: String,
    pub problem: String,
}

/// Errors raised by the runtime layer (container driver, registry
/// aggregator, gateway publisher, manifest validation).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Manifest failed §4.9 validation; carries every field-level problem,
    /// not just the first one.
    #[error("invalid manifest: {0:?}")]
    InvalidManifest(Vec<FieldProblem>),

    /// Memory/CPU resource string did not parse (caller should fall back to
    /// the documented default rather than surface this as fatal).
    #[error("invalid resource string: {0}")]
    InvalidResource(String),

    /// Container daemon API returned an error pulling an image.
    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    /// Container daemon is unreachable or returned a transport-level error.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The referenced container handle no longer exists in the runtime.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// External gateway's admin API rejected or failed a publish call.
    #[error("gateway publish failed: {0}")]
    GatewayFailure(String),

    /// A remote registry index failed to fetch or parse.
    #[error("registry fetch failed for source {source_id}: {message}")]
    RegistryFetchFailed { source_id: String, message: String },

    /// Offline package archive exceeded the 2 GiB ceiling or was malformed.
    #[error("package error: {0}")]
    Package(String),

    /// Underlying HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive (zip) error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Catch-all for conditions that should not occur in a correct caller.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
