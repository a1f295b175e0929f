//! Backend configuration.
//!
//! Loaded from environment variables with defaults for local development.

use mailgate_auth::IntegrationKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend base URL variable.
pub const BACKEND_URL_ENV: &str = "MAILGATE_BACKEND_URL";

/// Request timeout variable, in seconds.
pub const TIMEOUT_SECS_ENV: &str = "MAILGATE_TIMEOUT_SECS";

/// TLS verification toggle variable.
pub const VERIFY_TLS_ENV: &str = "MAILGATE_VERIFY_TLS";

/// Backend API configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL for the backend (e.g., "https://api.mailgate.app").
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Path of the token exchange endpoint.
    pub exchange_path: String,

    /// Path of the current-user endpoint.
    pub current_user_path: String,

    /// Whether to verify TLS certificates (disable only for testing).
    pub verify_tls: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            exchange_path: "/api/auth/firebase-token".to_string(),
            current_user_path: "/api/auth/me".to_string(),
            verify_tls: true,
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MAILGATE_BACKEND_URL`: backend URL (default: http://localhost:8000)
    /// - `MAILGATE_TIMEOUT_SECS`: request timeout in seconds (default: 30)
    /// - `MAILGATE_VERIFY_TLS`: whether to verify TLS (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            base_url: std::env::var(BACKEND_URL_ENV).unwrap_or(default.base_url),
            timeout_secs: std::env::var(TIMEOUT_SECS_ENV)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.timeout_secs),
            verify_tls: std::env::var(VERIFY_TLS_ENV)
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.verify_tls),
            ..default
        }
    }

    /// Point at a different backend.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Token exchange endpoint URL.
    pub fn exchange_url(&self) -> String {
        self.url(&self.exchange_path)
    }

    /// Backend login URL that starts linking `kind`.
    pub fn integration_login_url(&self, kind: IntegrationKind) -> String {
        self.url(&format!("/integrations/{}/auth/login", kind.as_str()))
    }
}
