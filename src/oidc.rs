//! Sources of OIDC ID tokens used for workload identity federation.

use crate::prelude::warn;
use base64ct::{Base64UrlUnpadded, Encoding as _};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;

/// A cached token is re-read once fewer than this many seconds remain.
pub const OIDC_TOKEN_REFRESH_WINDOW_SECS: i64 = 10 * 60;

// Bound on the decoded payload size; ID tokens are far smaller.
const MAX_JWT_SEGMENT_SIZE: usize = 64 * 1024;

/// Errors produced by an [`OidcTokenProvider`].
#[derive(Debug, Error)]
pub enum OidcTokenError {
    /// No token has been configured.
    #[error("oidc token is not set")]
    Missing,

    /// The token file could not be read.
    #[error("failed to read oidc token file {path}")]
    Io {
        /// The token file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The token file is empty.
    #[error("oidc token file {0} is empty")]
    Empty(PathBuf),
}

/// Supplies the OIDC ID token presented to the token endpoint.
pub trait OidcTokenProvider: Send + Sync {
    /// Returns a currently valid ID token.
    ///
    /// # Errors
    ///
    /// Returns an [`OidcTokenError`] if no token is available.
    fn oidc_token(&self) -> Result<String, OidcTokenError>;
}

/// Serves a token set in code.
#[derive(Default)]
pub struct StaticOidcTokenProvider {
    token: RwLock<Option<String>>,
}

impl Debug for StaticOidcTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticOidcTokenProvider")
            .field("token", &self.token.read().as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StaticOidcTokenProvider {
    /// Creates a provider serving `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replaces the served token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }
}

impl OidcTokenProvider for StaticOidcTokenProvider {
    fn oidc_token(&self) -> Result<String, OidcTokenError> {
        self.token
            .read()
            .as_ref()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .ok_or(OidcTokenError::Missing)
    }
}

struct CachedToken {
    token: String,
    expires_at: Option<i64>,
}

impl CachedToken {
    fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .is_some_and(|exp| exp - now.unix_timestamp() >= OIDC_TOKEN_REFRESH_WINDOW_SECS)
    }
}

/// Reads the token from a file, as projected by Kubernetes service account
/// token volumes and similar mechanisms.
///
/// The token is cached and the file re-read when the cached token's `exp`
/// claim is unknown or less than ten minutes away. The token signature is not
/// verified; only the expiry is inspected.
pub struct FileOidcTokenProvider {
    path: PathBuf,
    cached: Mutex<Option<CachedToken>>,
}

impl Debug for FileOidcTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cached.lock();
        f.debug_struct("FileOidcTokenProvider")
            .field("path", &self.path)
            .field("expires_at", &cached.as_ref().and_then(|c| c.expires_at))
            .finish()
    }
}

impl FileOidcTokenProvider {
    /// Creates a provider reading `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// The token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn token_at(&self, now: OffsetDateTime) -> Result<String, OidcTokenError> {
        let mut cached = self.cached.lock();
        if let Some(current) = cached.as_ref().filter(|c| c.is_fresh_at(now)) {
            return Ok(current.token.clone());
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|source| OidcTokenError::Io {
            path: self.path.clone(),
            source,
        })?;
        let token = raw.trim().to_owned();
        if token.is_empty() {
            return Err(OidcTokenError::Empty(self.path.clone()));
        }

        let expires_at = unverified_expiry(&token);
        if expires_at.is_none() {
            warn!(
                "could not read expiry of oidc token in {}; it will be re-read on every use",
                self.path.display()
            );
        }
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

impl OidcTokenProvider for FileOidcTokenProvider {
    fn oidc_token(&self) -> Result<String, OidcTokenError> {
        self.token_at(OffsetDateTime::now_utc())
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a compact JWT without verifying it.
pub(crate) fn unverified_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    if payload.len() > MAX_JWT_SEGMENT_SIZE * 4 / 3 {
        return None;
    }
    let decoded = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<ExpiryClaim>(&decoded).ok()?.exp
}
