//! Token exchange contract
//!
//! Trades a federated identity assertion for a backend bearer token. The
//! HTTP implementation lives in `mailgate-api`.

use crate::error::AuthResult;
use crate::session::{BearerToken, IdentityAssertion};
use async_trait::async_trait;

/// Performs the single network call behind a token exchange.
///
/// Fails with [`AuthError::ExchangeRejected`](crate::AuthError::ExchangeRejected)
/// when the backend refuses the assertion and
/// [`AuthError::ExchangeUnreachable`](crate::AuthError::ExchangeUnreachable) on
/// transport failure. Implementations do not retry.
#[async_trait]
pub trait TokenExchangeClient: Send + Sync {
    /// Exchange an identity assertion for a bearer token.
    async fn exchange(&self, assertion: &IdentityAssertion) -> AuthResult<BearerToken>;
}
