//! Gateway error types.

use thiserror::Error;

/// Errors returned to callers of the API gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend rejected the bearer token; the session has already been
    /// invalidated.
    #[error("Unauthorized")]
    Unauthorized,

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Result type for gateway operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse(_) => None,
        }
    }
}
