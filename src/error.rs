//! Error types for the FlowForge Kubernetes driver

use thiserror::Error;

/// Main error type for driver operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error that is neither a conflict nor a missing object
    #[error("Kubernetes error: {0}")]
    KubeError(#[source] kube::Error),

    /// The object already exists on the platform (HTTP 409)
    #[error("{kind} {name} already exists")]
    Conflict { kind: &'static str, name: String },

    /// The object does not exist on the platform (HTTP 404)
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A readiness poll ran out of attempts
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    /// Malformed or unsupported operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Launcher or agent HTTP endpoint could not be reached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Launcher or agent HTTP endpoint answered with a non-success status
    #[error("Upstream {url} returned HTTP {status}")]
    UpstreamStatus { status: u16, url: String },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Persistence layer failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// The instance record cannot be turned into a resource set
    #[error("Invalid instance {id}: {reason}")]
    InvalidInstance { id: String, reason: String },

    /// The driver has no cached entry for the instance
    #[error("Instance {0} is not known to this driver")]
    UnknownInstance(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err)
    }
}

impl Error {
    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::Timeout { .. }
            | Error::UpstreamUnavailable(_)
            | Error::HttpError(_) => true,
            Error::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Short category name used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Conflict { .. } => "conflict",
            Error::NotFound { .. } => "not_found",
            Error::Timeout { .. } => "timeout",
            Error::ConfigError(_) => "config",
            Error::UpstreamUnavailable(_) | Error::UpstreamStatus { .. } => "upstream",
            Error::HttpError(_) => "http",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
            Error::StoreError(_) => "store",
            Error::InvalidInstance { .. } => "invalid_instance",
            Error::UnknownInstance(_) => "unknown_instance",
        }
    }
}
