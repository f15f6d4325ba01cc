//! Error type of the credential providers and the factory.

use crate::assertion::AssertionError;
use crate::attestation::AttestationError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::http::HttpError;
use crate::oauth2::TokenAuthnMethod;
use crate::oidc::OidcTokenError;
use thiserror::Error;

/// Errors produced while obtaining a credential.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// A required setting is missing or blank.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The authentication method cannot be used by this provider.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthnMethod(TokenAuthnMethod),

    /// The token endpoint answered with values that cannot be used, such as an
    /// expiry outside the representable date range.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The credential cache could not produce a value.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The token endpoint could not be reached or rejected the request.
    #[error("token request failed")]
    Http(#[from] HttpError),

    /// The client assertion could not be built.
    #[error("client assertion error")]
    Assertion(#[from] AssertionError),

    /// The OIDC token could not be obtained.
    #[error("oidc token error")]
    OidcToken(#[from] OidcTokenError),

    /// The attested document could not be obtained.
    #[error("attested document error")]
    Attestation(#[from] AttestationError),

    /// The client configuration is unusable.
    #[error("configuration error")]
    Config(#[from] ConfigError),
}

impl CredentialError {
    pub(crate) fn blank(field: &str) -> Self {
        Self::InvalidArgument(format!("{field} is blank"))
    }

    /// OAuth2 error code returned by the token endpoint, if any. Looks through
    /// failed cache refreshes.
    pub fn oauth2_error_code(&self) -> Option<&str> {
        match self {
            Self::Http(e) => e.oauth2_error_code(),
            Self::Cache(CacheError::Refresh(source)) => source
                .downcast_ref::<Self>()
                .and_then(Self::oauth2_error_code),
            _ => None,
        }
    }
}
