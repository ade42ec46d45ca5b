use bidfleet_core::CoreError;
use thiserror::Error;

/// Control plane specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Unknown backend failure: {0}")]
    Unknown(String),
}

impl ControlPlaneError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ControlPlaneError::ResourceNotFound {
            resource: resource.into(),
        }
    }

    /// Whether this is a not-found for the resource `link` (or its bare name).
    pub fn is_not_found_for(&self, link: &str) -> bool {
        match self {
            ControlPlaneError::ResourceNotFound { resource } => {
                resource == link || link.rsplit('/').next() == Some(resource.as_str())
            }
            _ => false,
        }
    }

    /// Label used for metrics and logs.
    pub fn class(&self) -> &'static str {
        match self {
            ControlPlaneError::ValidationError(_) => "validation",
            ControlPlaneError::ResourceNotFound { .. } => "resource_not_found",
            ControlPlaneError::QuotaExceeded(_) => "quota_exceeded",
            ControlPlaneError::Timeout(_) => "timeout",
            ControlPlaneError::Unknown(_) => "unknown",
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        ControlPlaneError::ValidationError(err.to_string())
    }
}

impl From<ControlPlaneError> for bidfleet_core::ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        let code = match &err {
            ControlPlaneError::ValidationError(_) => "VALIDATION_ERROR",
            ControlPlaneError::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            ControlPlaneError::QuotaExceeded(_) => "CONFLICT",
            ControlPlaneError::Timeout(_) => "DEADLINE_EXCEEDED",
            ControlPlaneError::Unknown(_) => "UNKNOWN",
        };

        bidfleet_core::ErrorResponse::new(code, err.to_string())
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
