//! Mail and calendar integrations
//!
//! Linking an integration is a backend concern; the session core only knows
//! which kinds exist and when it is safe to ask for a link.

use crate::error::AuthResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integration types the backend can connect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    /// Gmail
    Gmail,
    /// Google Calendar
    Calendar,
}

impl IntegrationKind {
    /// Identifier used in paths and redirect parameters.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Gmail => "gmail",
            IntegrationKind::Calendar => "calendar",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gmail" => Some(IntegrationKind::Gmail),
            "calendar" | "google_calendar" => Some(IntegrationKind::Calendar),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            IntegrationKind::Gmail => "Gmail",
            IntegrationKind::Calendar => "Google Calendar",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records an integration for the signed-in user.
///
/// Only invoked once the session is authenticated.
#[async_trait]
pub trait IntegrationLinker: Send + Sync {
    /// Link `kind` to the account identified by `user_email`.
    async fn link(&self, kind: IntegrationKind, user_email: &str) -> AuthResult<()>;
}
