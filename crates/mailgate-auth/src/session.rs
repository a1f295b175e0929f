//! Session data model
//!
//! The unified authentication fact consumed by the rest of the client,
//! plus the credential values that feed it.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use mailgate_events::Phase;

/// Backend-issued bearer credential.
///
/// Opaque to the client; `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the raw string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

/// Identity reported by the federated identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    /// Provider-scoped user ID
    pub id: String,

    /// Display name, if the provider has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Email address, if the provider shares it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl FederatedIdentity {
    /// Create an identity with only an ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
        }
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Signed identity assertion returned by a successful provider sign-in.
///
/// Consumed once by the token exchange and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityAssertion {
    /// Provider-signed ID token
    pub id_token: String,

    /// Email the assertion was issued for
    pub email: String,
}

impl IdentityAssertion {
    /// Create a new assertion.
    pub fn new(id_token: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
            email: email.into(),
        }
    }
}

impl fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAssertion")
            .field("id_token", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

/// Persisted subset of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Bearer token sent on API calls
    pub bearer_token: BearerToken,

    /// Email associated with the token
    pub user_email: Option<String>,
}

impl CredentialRecord {
    /// Create a new record.
    pub fn new(bearer_token: BearerToken, user_email: Option<String>) -> Self {
        Self {
            bearer_token,
            user_email,
        }
    }
}

/// Unified authentication state.
///
/// `phase` is `Authenticated` exactly when `bearer_token` or
/// `federated_identity` is present, except while the first reconciliation
/// pass is still `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Backend credential
    pub bearer_token: Option<BearerToken>,

    /// Email shown to the user and tied to the bearer token
    pub user_email: Option<String>,

    /// Identity from the federated provider
    pub federated_identity: Option<FederatedIdentity>,

    /// Current phase
    pub phase: Phase,

    /// Last user-visible failure message
    pub last_error: Option<String>,
}

impl Session {
    /// Session before anything is known.
    pub fn initializing() -> Self {
        Self {
            bearer_token: None,
            user_email: None,
            federated_identity: None,
            phase: Phase::Initializing,
            last_error: None,
        }
    }

    /// Session rehydrated from a persisted record.
    ///
    /// A stored bearer token is provisionally authenticated; otherwise the
    /// session waits for the provider's first report.
    pub fn rehydrate(record: Option<CredentialRecord>) -> Self {
        match record {
            Some(record) => Self {
                bearer_token: Some(record.bearer_token),
                user_email: record.user_email,
                federated_identity: None,
                phase: Phase::Authenticated,
                last_error: None,
            },
            None => Self::initializing(),
        }
    }

    /// Whether either credential source is present.
    pub fn has_credentials(&self) -> bool {
        self.bearer_token.is_some() || self.federated_identity.is_some()
    }

    /// The phase implied by the credentials currently held.
    pub fn derived_phase(&self) -> Phase {
        if self.has_credentials() {
            Phase::Authenticated
        } else {
            Phase::Unauthenticated
        }
    }

    /// Whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.phase == Phase::Authenticated
    }

    /// Drop every credential.
    pub(crate) fn clear_credentials(&mut self) {
        self.bearer_token = None;
        self.user_email = None;
        self.federated_identity = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::initializing()
    }
}
