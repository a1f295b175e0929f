//! Event types for session observation
//!
//! This module defines the events published while the session manager
//! reconciles identity and credentials, plus the navigation side effects
//! it performs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Authentication phase of the session.
///
/// `Initializing` only appears before the first reconciliation pass settles
/// and is never re-entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the identity provider's first report
    Initializing,
    /// A bearer token or federated identity is present
    Authenticated,
    /// Neither source has a credential
    Unauthenticated,
}

impl Phase {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Authenticated => "authenticated",
            Phase::Unauthenticated => "unauthenticated",
        }
    }

    /// Whether the phase has left `Initializing`.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Phase::Initializing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that emitted an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Session manager transitions
    Session,
    /// Navigation side effects
    Navigation,
}

impl EventSource {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Session => "session",
            EventSource::Navigation => "navigation",
        }
    }
}

/// Event envelope.
///
/// All events are wrapped in this envelope which provides metadata
/// for routing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Event type (e.g., "phase.changed", "exchange.failed")
    pub event_type: String,

    /// Emitting component
    pub source: EventSource,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Event version for schema evolution
    pub version: u32,

    /// Event payload
    pub payload: serde_json::Value,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create a new event.
    pub fn new(
        event_type: impl Into<String>,
        source: EventSource,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            source,
            timestamp: Utc::now(),
            correlation_id: None,
            version: 1,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `{source}.{event_type}`
    pub fn topic(&self) -> String {
        format!("{}.{}", self.source.as_str(), self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// The user asked to log out
    UserRequested,
    /// The backend rejected the bearer token
    Unauthorized,
}

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session phase changed
    PhaseChanged {
        from: Phase,
        to: Phase,
        user_email: Option<String>,
    },
    /// A federated identity was exchanged for a bearer token
    TokenExchanged {
        identity_id: String,
        user_email: String,
    },
    /// A token exchange failed
    ExchangeFailed {
        identity_id: String,
        error_code: String,
        message: String,
    },
    /// A token exchange resolved after a newer identity arrived
    ExchangeDiscarded { identity_id: String },
    /// A bearer token was accepted out-of-band
    LoggedIn { user_email: String },
    /// The session was ended
    LoggedOut { reason: SignOutReason },
    /// A provider sign-in or sign-up attempt failed
    SignInFailed { method: String, message: String },
    /// A redirect carried a token that could not be decoded
    RedirectRejected { message: String },
}

impl SessionEvent {
    /// Event type string used for topic routing.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::PhaseChanged { .. } => "phase.changed",
            SessionEvent::TokenExchanged { .. } => "exchange.succeeded",
            SessionEvent::ExchangeFailed { .. } => "exchange.failed",
            SessionEvent::ExchangeDiscarded { .. } => "exchange.discarded",
            SessionEvent::LoggedIn { .. } => "login",
            SessionEvent::LoggedOut { .. } => "logout",
            SessionEvent::SignInFailed { .. } => "sign_in.failed",
            SessionEvent::RedirectRejected { .. } => "redirect.rejected",
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        Event::new(self.event_type(), EventSource::Session, payload)
    }
}

/// Navigation side effects performed by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationEvent {
    /// The session redirected the user to a path
    Redirected { to: String },
}

impl NavigationEvent {
    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let event_type = match self {
            NavigationEvent::Redirected { .. } => "redirected",
        };
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        Event::new(event_type, EventSource::Navigation, payload)
    }
}
