//! Error types for session operations
//!
//! This module defines every failure the session core can observe, from
//! identity provider errors to token exchange and credential persistence.

use thiserror::Error;

/// Session error types.
///
/// Provider and exchange failures never escape as panics; the session
/// manager downgrades them to an unauthenticated state and keeps the
/// message for display.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The backend rejected the identity assertion (expired, bad signature, unknown issuer)
    #[error("Token exchange rejected: {0}")]
    ExchangeRejected(String),

    /// The token exchange endpoint could not be reached
    #[error("Token exchange endpoint unreachable: {0}")]
    ExchangeUnreachable(String),

    /// The user cancelled sign-in or the provider failed
    #[error("Provider sign-in failed: {0}")]
    ProviderSignInFailed(String),

    /// The provider could not sign the user out remotely
    #[error("Provider sign-out failed: {0}")]
    ProviderSignOutFailed(String),

    /// A redirect delivered a token whose claims could not be decoded
    #[error("Malformed redirect token: {0}")]
    MalformedRedirectToken(String),

    /// The backend rejected the bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credential store read or write failed
    #[error("Credential storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The session manager has shut down
    #[error("Session manager is no longer running")]
    SessionClosed,
}

/// Result type for session operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Whether this error came out of the token exchange.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            AuthError::ExchangeRejected(_) | AuthError::ExchangeUnreachable(_)
        )
    }

    /// Get a stable error code for events and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::ExchangeRejected(_) => "EXCHANGE_REJECTED",
            AuthError::ExchangeUnreachable(_) => "EXCHANGE_UNREACHABLE",
            AuthError::ProviderSignInFailed(_) => "PROVIDER_SIGN_IN_FAILED",
            AuthError::ProviderSignOutFailed(_) => "PROVIDER_SIGN_OUT_FAILED",
            AuthError::MalformedRedirectToken(_) => "MALFORMED_REDIRECT_TOKEN",
            AuthError::Unauthorized(_) => "UNAUTHORIZED",
            AuthError::Storage(_) => "STORAGE_ERROR",
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::SessionClosed => "SESSION_CLOSED",
        }
    }

    /// Message suitable for showing on the sign-in view.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::ExchangeRejected(_) => {
                "Sign-in was rejected by the server. Please try again.".to_string()
            }
            AuthError::ExchangeUnreachable(_) => {
                "Could not reach the server to complete sign-in. Check your connection and try again."
                    .to_string()
            }
            AuthError::ProviderSignInFailed(reason) => format!("Sign-in failed: {}", reason),
            AuthError::ProviderSignOutFailed(_) => "Signed out locally.".to_string(),
            AuthError::MalformedRedirectToken(_) => {
                "The sign-in link was invalid. Please sign in again.".to_string()
            }
            AuthError::Unauthorized(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            AuthError::Storage(_) | AuthError::ConfigError(_) | AuthError::SessionClosed => {
                "Something went wrong while saving your session.".to_string()
            }
        }
    }
}
