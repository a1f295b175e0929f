//! Mailgate Session Core
//!
//! Reconciles a federated identity-provider session with a backend-issued
//! bearer token into one authoritative [`Session`].
//!
//! - [`SessionManager`]: the reconciliation task and its [`SessionHandle`]
//! - [`CredentialStore`]: durable token + email persistence
//! - [`IdentityProviderAdapter`] / [`TokenExchangeClient`]: the two external
//!   collaborators, as traits
//! - [`RouteGuard`]: phase-driven admission of protected routes
//! - [`complete_redirect`]: backend sign-in redirects and integration linking
//!
//! # Example
//!
//! ```rust,ignore
//! use mailgate_auth::{FileCredentialStore, HistoryNavigator, Phase, SessionManager};
//! use std::sync::Arc;
//!
//! let store = Arc::new(FileCredentialStore::open_default()?);
//! let manager = SessionManager::builder(store, provider, exchange)
//!     .navigator(Arc::new(HistoryNavigator::new()))
//!     .start();
//!
//! let handle = manager.handle();
//! if handle.wait_until_settled().await?.phase == Phase::Unauthenticated {
//!     handle.sign_in_with_provider(IdentityProvider::Google).await?;
//! }
//! ```

pub mod claims;
pub mod config;
pub mod error;
pub mod exchange;
pub mod guard;
pub mod integration;
pub mod manager;
pub mod provider;
pub mod redirect;
pub mod routes;
pub mod session;
pub mod store;

pub use claims::{decode_redirect_token, RedirectClaims};
pub use config::SessionConfig;
pub use error::{AuthError, AuthResult};
pub use exchange::TokenExchangeClient;
pub use guard::{guard, GuardDecision, RouteGuard};
pub use integration::{IntegrationKind, IntegrationLinker};
pub use manager::{SessionHandle, SessionManager, SessionManagerBuilder};
pub use provider::{IdentityEvent, IdentityListener, IdentityProvider, IdentityProviderAdapter};
pub use redirect::{complete_redirect, RedirectOutcome, RedirectParams};
pub use routes::{HistoryNavigator, Navigator, Route};
pub use session::{
    BearerToken, CredentialRecord, FederatedIdentity, IdentityAssertion, Phase, Session,
};
pub use store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredCredentials,
    CREDENTIALS_PATH_ENV,
};
