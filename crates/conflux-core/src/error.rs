// Error types for the control plane

use conflux_abstraction::BackendError;
use thiserror::Error;

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Control-plane errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// Registration referenced a provider with no backend factory
    #[error("Unknown provider '{provider}': no backend factory registered")]
    UnknownProvider {
        /// The provider name that failed to resolve
        provider: String,
    },

    /// An operation referenced a model id that is not registered
    #[error("Model '{0}' is not registered")]
    UnknownModel(String),

    /// No registered entry satisfies the request
    #[error("No model available: {0}")]
    NoModelAvailable(String),

    /// Backend error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
