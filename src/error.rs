use thiserror::Error;

/// Result type for WASP operations
pub type Result<T> = std::result::Result<T, WaspError>;

/// Errors that can occur when talking to a WASP device
#[derive(Error, Debug)]
pub enum WaspError {
    /// The auth endpoint rejected the challenge or returned no usable id
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The device answered 401 again after a fresh credential was obtained
    #[error("Authorization still required after re-authenticating: {path}")]
    AuthRetryExhausted {
        /// Path of the request that was refused
        path: String,
    },

    /// Bulk read of the objects or schemas collection failed, either on
    /// status or because the body is not the expected collection
    #[error("Discovery failed: GET {path} returned HTTP {status}: {reason}")]
    Discovery {
        /// Collection path that failed
        path: String,
        /// Status returned by the device
        status: u16,
        reason: String,
    },

    /// No object matches the requested location or control
    #[error("Not found: {0}")]
    NotFound(String),

    /// A location key component is outside the accepted set
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The update endpoint did not accept the stream
    #[error("Update stream rejected (HTTP {status})")]
    StreamRejected {
        /// Status returned instead of 202
        status: u16,
    },

    /// The update stream failed after it was opened
    #[error("Update stream error: {0}")]
    Stream(String),

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Invalid base URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaspError {
    /// Returns `true` if a location or control lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if the device refused to authorize the session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::AuthRetryExhausted { .. })
    }
}
