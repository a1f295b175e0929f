//! Federated identity provider interface
//!
//! The provider's popup/redirect machinery is an external capability; this
//! module only fixes the contract the session manager consumes.

use crate::error::AuthResult;
use crate::session::{FederatedIdentity, IdentityAssertion};
use async_trait::async_trait;
use mailgate_events::DetachHandle;
use serde::{Deserialize, Serialize};

/// Supported sign-in providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityProvider {
    /// Google sign-in
    Google,
    /// GitHub sign-in
    GitHub,
    /// Email and password
    Email,
}

impl IdentityProvider {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProvider::Google => "google",
            IdentityProvider::GitHub => "github",
            IdentityProvider::Email => "email",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "google" | "google.com" => Some(IdentityProvider::Google),
            "github" | "github.com" => Some(IdentityProvider::GitHub),
            "email" | "password" => Some(IdentityProvider::Email),
            _ => None,
        }
    }
}

/// Identity-session change reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A user is signed in with the provider
    SignedIn {
        identity: FederatedIdentity,
        assertion: IdentityAssertion,
    },
    /// No user is signed in with the provider
    SignedOut,
}

impl IdentityEvent {
    /// The reported identity, if any.
    pub fn identity(&self) -> Option<&FederatedIdentity> {
        match self {
            IdentityEvent::SignedIn { identity, .. } => Some(identity),
            IdentityEvent::SignedOut => None,
        }
    }

    /// Whether two events report the same identity (or both report none).
    pub fn same_identity(&self, other: &IdentityEvent) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a.id == b.id,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Listener invoked on every identity-session change.
pub type IdentityListener = Box<dyn Fn(IdentityEvent) + Send + Sync>;

/// Adapter over a federated identity backend.
///
/// Implementations must invoke a newly attached listener with the current
/// identity state (or [`IdentityEvent::SignedOut`]) so the session can leave
/// `Initializing`, and then once per login or logout.
#[async_trait]
pub trait IdentityProviderAdapter: Send + Sync {
    /// Open the provider's sign-in flow.
    async fn sign_in_with_provider(
        &self,
        provider: IdentityProvider,
    ) -> AuthResult<IdentityAssertion>;

    /// Sign in with email and password.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<IdentityAssertion>;

    /// Create an account with email and password.
    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<IdentityAssertion>;

    /// End the provider session.
    async fn sign_out(&self) -> AuthResult<()>;

    /// Attach a listener for identity-session changes.
    fn on_identity_changed(&self, listener: IdentityListener) -> DetachHandle;
}
