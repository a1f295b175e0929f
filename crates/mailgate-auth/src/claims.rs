//! Redirect token claims
//!
//! After a backend OAuth completion the client receives a signed JWT in the
//! `token` query parameter. The client cannot verify the signature (it does
//! not hold the key) and only needs the subject, which the backend sets to
//! the user's email.

use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims carried by a backend-issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectClaims {
    /// Subject (user email)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Any other claims the backend added
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RedirectClaims {
    /// Email of the signed-in user.
    pub fn email(&self) -> &str {
        &self.sub
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        self.exp
            .map(|exp| Utc::now().timestamp() >= exp)
            .unwrap_or(false)
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Decode a redirect token's claims without verifying its signature.
///
/// Expiry is not enforced here; the backend rejects expired tokens on
/// first use.
pub fn decode_redirect_token(token: &str) -> AuthResult<RedirectClaims> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedRedirectToken("empty token".to_string()));
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data: TokenData<RedirectClaims> =
        decode(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| AuthError::MalformedRedirectToken(e.to_string()))?;

    if token_data.claims.sub.trim().is_empty() {
        return Err(AuthError::MalformedRedirectToken(
            "missing subject claim".to_string(),
        ));
    }

    Ok(token_data.claims)
}
