//! JWT client assertions (RFC 7523) used to authenticate the client itself.

mod client_secret;
mod private_key;

pub use client_secret::ClientSecretAssertionProvider;
pub use private_key::{PrivateKeyAssertionProvider, PrivateKeyKind};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Lifetime of a generated assertion, in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 10 * 60;

/// Produces signed client assertions for a token request.
///
/// The client id and token endpoint are supplied per call, so one provider can
/// serve any client configured against the same key material.
pub trait ClientAssertionProvider: Send + Sync {
    /// Returns a compact JWS asserting `client_id` to `token_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an [`AssertionError`] if a required claim is blank, the key
    /// material is unusable or signing fails.
    fn client_assertion(&self, client_id: &str, token_endpoint: &str)
        -> Result<String, AssertionError>;
}

/// Errors produced while building a client assertion.
#[derive(Debug, Error)]
pub enum AssertionError {
    /// A claim needed for the assertion is empty.
    #[error("{0} is required for generating a client assertion")]
    MissingClaim(&'static str),

    /// The client secret used as HMAC key is empty.
    #[error("client secret is blank")]
    BlankSecret,

    /// The private key could not be parsed.
    #[error("failed to parse private key: {0}")]
    InvalidKey(String),

    /// The private key type cannot sign assertions.
    #[error("unsupported private key type: {0}")]
    UnsupportedKey(String),

    /// Signing failed.
    #[error("failed to sign client assertion")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Claims of a client assertion.
///
/// `iss` and `sub` are the client id, `aud` is the token endpoint, `jti` is a
/// random UUID and the assertion is valid for ten minutes from `iat`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer: the client id.
    pub iss: String,
    /// Subject: the client id.
    pub sub: String,
    /// Audience: the token endpoint.
    pub aud: String,
    /// Unique assertion id.
    pub jti: String,
    /// Issued-at, UNIX seconds.
    pub iat: i64,
    /// Expiry, UNIX seconds.
    pub exp: i64,
}

impl AssertionClaims {
    /// Builds the claims for `client_id` and `token_endpoint` issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AssertionError::MissingClaim`] if either input is blank.
    pub fn new(
        client_id: &str,
        token_endpoint: &str,
        now: OffsetDateTime,
    ) -> Result<Self, AssertionError> {
        if client_id.trim().is_empty() {
            return Err(AssertionError::MissingClaim("client_id"));
        }
        if token_endpoint.trim().is_empty() {
            return Err(AssertionError::MissingClaim("token_endpoint"));
        }
        let iat = now.unix_timestamp();
        Ok(Self {
            iss: client_id.to_owned(),
            sub: client_id.to_owned(),
            aud: token_endpoint.to_owned(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn claims_follow_client_assertion_profile() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let claims = AssertionClaims::new("app-1", "https://idp/token", now).unwrap();
        assert_eq!(claims.iss, "app-1");
        assert_eq!(claims.sub, "app-1");
        assert_eq!(claims.aud, "https://idp/token");
        assert_eq!(claims.exp - claims.iat, 600);
        assert!(uuid::Uuid::parse_str(&claims.jti).is_ok());
    }

    #[test]
    fn every_assertion_gets_a_fresh_jti() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let a = AssertionClaims::new("app", "https://idp/token", now).unwrap();
        let b = AssertionClaims::new("app", "https://idp/token", now).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn blank_inputs_are_rejected() {
        let now = OffsetDateTime::UNIX_EPOCH;
        assert!(matches!(
            AssertionClaims::new(" ", "https://idp/token", now),
            Err(AssertionError::MissingClaim("client_id"))
        ));
        assert!(matches!(
            AssertionClaims::new("app", "", now),
            Err(AssertionError::MissingClaim("token_endpoint"))
        ));
    }
}
