//! Backend sign-in redirects
//!
//! After an OAuth completion the backend sends the client to
//! `/login?token=<jwt>&integration=<kind>`. This module pulls those
//! parameters apart and sequences login before any integration linking.

use crate::error::{AuthError, AuthResult};
use crate::integration::{IntegrationKind, IntegrationLinker};
use crate::manager::SessionHandle;
use crate::session::Phase;
use std::borrow::Cow;
use tracing::{info, warn};
use url::Url;

/// Parameters carried by a sign-in redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    /// Signed backend token
    pub token: Option<String>,

    /// Integration the user was connecting, if any
    pub integration: Option<IntegrationKind>,
}

impl RedirectParams {
    /// Extract parameters from a full redirect URL.
    pub fn from_url(url: &str) -> AuthResult<Self> {
        let url = Url::parse(url).map_err(|e| {
            AuthError::MalformedRedirectToken(format!("invalid redirect URL: {}", e))
        })?;
        Ok(Self::from_pairs(url.query_pairs()))
    }

    /// Extract parameters from a query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    fn from_pairs<'a>(pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_ref() {
                "token" if !value.is_empty() => params.token = Some(value.into_owned()),
                "integration" => {
                    params.integration = IntegrationKind::parse(&value);
                    if params.integration.is_none() {
                        warn!(integration = %value, "Ignoring unknown integration in redirect");
                    }
                }
                _ => {}
            }
        }
        params
    }
}

/// Outcome of [`complete_redirect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    /// Email taken from the token
    pub user_email: String,

    /// Integration linked after login, if one was requested
    pub linked: Option<IntegrationKind>,
}

/// Log in from a redirect URL and then link the requested integration.
///
/// The linker runs only after the session has reached `Authenticated`, and
/// never when login fails. Returns `Ok(None)` when the URL carries no token.
pub async fn complete_redirect(
    session: &SessionHandle,
    url: &str,
    linker: &dyn IntegrationLinker,
) -> AuthResult<Option<RedirectOutcome>> {
    let params = RedirectParams::from_url(url)?;
    let token = match params.token {
        Some(token) => token,
        None => return Ok(None),
    };

    let user_email = session.login_from_redirect(&token).await?;

    let linked = match params.integration {
        Some(kind) => {
            let phase = session.wait_until_settled().await?.phase;
            if phase != Phase::Authenticated {
                warn!(integration = %kind, %phase, "Session ended before integration could be linked");
                return Err(AuthError::Unauthorized(
                    "session ended before integration linking".to_string(),
                ));
            }
            linker.link(kind, &user_email).await?;
            info!(integration = %kind, email = %user_email, "Integration linked");
            Some(kind)
        }
        None => None,
    };

    Ok(Some(RedirectOutcome { user_email, linked }))
}
