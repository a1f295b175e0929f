//! Mailgate Backend Access
//!
//! HTTP side of the session core:
//!
//! - [`HttpTokenExchangeClient`]: trades a provider ID token for a backend
//!   bearer token
//! - [`ApiGateway`]: attaches the bearer token to every call and turns a 401
//!   into a single session invalidation
//! - [`ApiConfig`]: backend location and timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use mailgate_api::{ApiConfig, ApiGateway, HttpTokenExchangeClient};
//! use mailgate_auth::{FileCredentialStore, SessionManager};
//! use std::sync::Arc;
//!
//! let config = ApiConfig::from_env();
//! let store = Arc::new(FileCredentialStore::open_default()?);
//! let exchange = Arc::new(HttpTokenExchangeClient::new(&config)?);
//!
//! let manager = SessionManager::builder(store.clone(), provider, exchange).start();
//! let gateway = ApiGateway::new(config, store)?.with_session(manager.handle());
//!
//! let me = gateway.current_user().await?;
//! ```

pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use exchange::{ExchangeResponse, HttpTokenExchangeClient};
pub use gateway::{ApiGateway, UnauthorizedHandler, UserProfile};
