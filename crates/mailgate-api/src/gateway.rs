//! Authenticated API gateway
//!
//! Every outbound backend call goes through [`ApiGateway`]. It reads the
//! bearer token from the credential store right before sending, attaches it
//! when present, and reports a 401 to an [`UnauthorizedHandler`] together with
//! the token that was rejected. The handler decides whether that token is
//! still current, so concurrent 401s collapse into a single sign-out.

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use mailgate_auth::{BearerToken, CredentialStore, SessionHandle};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reacts to the backend rejecting a bearer token.
#[async_trait]
pub trait UnauthorizedHandler: Send + Sync {
    /// Called with the token that was sent on the rejected request.
    async fn on_unauthorized(&self, token: &BearerToken);
}

#[async_trait]
impl UnauthorizedHandler for SessionHandle {
    async fn on_unauthorized(&self, token: &BearerToken) {
        match self.invalidate(token).await {
            Ok(true) => info!("Session invalidated after 401"),
            Ok(false) => debug!("401 for a token that was already invalidated"),
            Err(e) => warn!(error = %e, "Could not invalidate session after 401"),
        }
    }
}

/// The signed-in user as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account email
    pub email: String,

    /// Backend user ID
    #[serde(default)]
    pub id: Option<String>,
}

/// Gateway for authenticated backend calls.
#[derive(Clone)]
pub struct ApiGateway {
    client: Client,
    config: ApiConfig,
    store: Arc<dyn CredentialStore>,
    on_unauthorized: Option<Arc<dyn UnauthorizedHandler>>,
}

impl ApiGateway {
    /// Create a gateway reading tokens from `store`.
    pub fn new(config: ApiConfig, store: Arc<dyn CredentialStore>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            config,
            store,
            on_unauthorized: None,
        })
    }

    /// Report 401 responses to `handler`.
    pub fn with_unauthorized_handler(mut self, handler: Arc<dyn UnauthorizedHandler>) -> Self {
        self.on_unauthorized = Some(handler);
        self
    }

    /// Report 401 responses to a session.
    pub fn with_session(self, session: SessionHandle) -> Self {
        self.with_unauthorized_handler(Arc::new(session))
    }

    /// Backend configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Fetch the signed-in user.
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> ApiResult<UserProfile> {
        self.get(&self.config.current_user_path).await
    }

    /// `GET` a JSON resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        debug!("GET {}", path);
        let response = self.send(self.client.get(self.config.url(path))).await?;
        parse_json(response).await
    }

    /// `POST` a JSON body and parse the JSON reply.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST {}", path);
        let request = self.client.post(self.config.url(path)).json(body);
        let response = self.send(request).await?;
        parse_json(response).await
    }

    /// `PUT` a JSON body and parse the JSON reply.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("PUT {}", path);
        let request = self.client.put(self.config.url(path)).json(body);
        let response = self.send(request).await?;
        parse_json(response).await
    }

    /// `DELETE` a resource, ignoring the reply body.
    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        debug!("DELETE {}", path);
        self.send(self.client.delete(self.config.url(path))).await?;
        Ok(())
    }

    /// Attach the current token, send, and map failure statuses.
    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let token = self.store.bearer_token();
        let request = match &token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            match (&token, &self.on_unauthorized) {
                (Some(token), Some(handler)) => handler.on_unauthorized(token).await,
                (Some(_), None) => warn!("401 received but no session is attached"),
                (None, _) => debug!("401 on a request sent without a token"),
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("API error ({}): {}", status.as_u16(), message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

impl std::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("base_url", &self.config.base_url)
            .field("session_attached", &self.on_unauthorized.is_some())
            .finish()
    }
}
