//! HTTP token exchange client.
//!
//! Trades a provider ID token for a backend bearer token via
//! `POST {exchange_path}` with body `{"id_token": ...}`.

use crate::config::ApiConfig;
use crate::error::ApiResult;
use async_trait::async_trait;
use mailgate_auth::{AuthError, AuthResult, BearerToken, IdentityAssertion, TokenExchangeClient};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    id_token: &'a str,
}

/// Successful exchange response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    /// Backend bearer token
    pub access_token: String,

    /// Token type, normally "bearer"
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Token exchange over HTTP.
///
/// A single request per call; nothing is retried.
#[derive(Clone)]
pub struct HttpTokenExchangeClient {
    client: Client,
    url: String,
}

impl HttpTokenExchangeClient {
    /// Create a client for the configured backend.
    pub fn new(config: &ApiConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            url: config.exchange_url(),
        })
    }

    /// Endpoint this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenExchangeClient for HttpTokenExchangeClient {
    #[instrument(skip_all, fields(email = %assertion.email))]
    async fn exchange(&self, assertion: &IdentityAssertion) -> AuthResult<BearerToken> {
        debug!("Exchanging identity assertion at {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&ExchangeRequest {
                id_token: &assertion.id_token,
            })
            .send()
            .await
            .map_err(|e| AuthError::ExchangeUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Token exchange rejected ({}): {}", status.as_u16(), message);
            return Err(AuthError::ExchangeRejected(format!(
                "{}: {}",
                status.as_u16(),
                message
            )));
        }

        let body: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeRejected(format!("invalid response: {}", e)))?;

        if body.access_token.is_empty() {
            return Err(AuthError::ExchangeRejected(
                "response carried an empty access token".to_string(),
            ));
        }

        Ok(BearerToken::new(body.access_token))
    }
}

impl std::fmt::Debug for HttpTokenExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenExchangeClient")
            .field("url", &self.url)
            .finish()
    }
}
