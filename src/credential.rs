//! Credentials returned by the token endpoint.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use zeroize::Zeroize;

/// Share of the lifetime under which a token counts as about to expire.
const SOON_EXPIRE_FACTOR: f64 = 0.15;

/// Returns a client secret on demand. An empty string means no secret is available.
pub type SecretSupplier = Arc<dyn Fn() -> String + Send + Sync + 'static>;

/// Read access to an OAuth2 credential.
pub trait Credential {
    /// The bearer access token.
    fn access_token(&self) -> &str;

    /// The OIDC ID token, if one was issued.
    fn id_token(&self) -> Option<&str>;

    /// The refresh token, if one was issued.
    fn refresh_token(&self) -> Option<&str>;

    /// Token type, usually `Bearer`.
    fn token_type(&self) -> &str;
}

/// Successful token endpoint response.
///
/// `expires_at` is an absolute UNIX timestamp in seconds. When the endpoint
/// omits it, it is derived from `expires_in` at parse time (see
/// [`TokenResponse::from_json`]).
///
/// Token strings are zeroized on drop and redacted from `Debug` output.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct TokenResponse {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    expires_at: i64,
}

fn default_token_type() -> String {
    String::from("Bearer")
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenResponse {
    /// Creates a bearer token response.
    pub fn new(access_token: impl Into<String>, expires_in: i64, expires_at: i64) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: None,
            refresh_token: None,
            token_type: default_token_type(),
            expires_in,
            expires_at,
        }
    }

    /// Attaches an ID token.
    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// Attaches a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Parses a token endpoint body, filling in `expires_at` from `expires_in`
    /// relative to `now` when the endpoint did not send it.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body is not a token response, or
    /// if `expires_in` pushes the expiry past the range of a UNIX timestamp.
    pub fn from_json(body: &str, now: OffsetDateTime) -> Result<Self, serde_json::Error> {
        let mut response: Self = serde_json::from_str(body)?;
        if response.expires_at <= 0 {
            response.expires_at = now
                .unix_timestamp()
                .checked_add(response.expires_in)
                .ok_or_else(|| serde_json::Error::custom("expires_in out of range"))?;
        }
        Ok(response)
    }

    /// Lifetime in seconds, as issued.
    pub const fn expires_in(&self) -> i64 {
        self.expires_in
    }

    /// Absolute expiry as a UNIX timestamp in seconds.
    pub const fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Absolute expiry as a date-time, or `None` if `expires_at` is outside the
    /// range `time` can represent.
    pub fn expires_at_datetime(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.expires_at).ok()
    }

    /// Returns `true` if less than 15% of the issued lifetime remains at `now`.
    #[allow(clippy::cast_precision_loss)]
    pub fn will_soon_expire_at(&self, now: OffsetDateTime) -> bool {
        let remaining = self.expires_at.saturating_sub(now.unix_timestamp());
        self.expires_in as f64 * SOON_EXPIRE_FACTOR > remaining as f64
    }

    /// Same as [`TokenResponse::will_soon_expire_at`] against the wall clock.
    pub fn will_soon_expire(&self) -> bool {
        self.will_soon_expire_at(OffsetDateTime::now_utc())
    }
}

impl Credential for TokenResponse {
    fn access_token(&self) -> &str {
        &self.access_token
    }

    fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    fn token_type(&self) -> &str {
        &self.token_type
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn expires_at_is_derived_when_missing() {
        let body = r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#;
        let token = TokenResponse::from_json(body, at(1_000)).unwrap();
        assert_eq!(token.access_token(), "at");
        assert_eq!(token.expires_at(), 4_600);
        assert_eq!(token.id_token(), None);
    }

    #[test]
    fn expires_at_from_endpoint_is_kept() {
        let body = r#"{"access_token":"at","expires_in":3600,"expires_at":9000,"id_token":"it"}"#;
        let token = TokenResponse::from_json(body, at(1_000)).unwrap();
        assert_eq!(token.expires_at(), 9_000);
        assert_eq!(token.token_type(), "Bearer");
        assert_eq!(token.id_token(), Some("it"));
    }

    #[test]
    fn soon_expiry_uses_fifteen_percent_of_lifetime() {
        let token = TokenResponse::new("at", 1_000, 10_000);
        // 150s threshold.
        assert!(!token.will_soon_expire_at(at(9_849)));
        assert!(token.will_soon_expire_at(at(9_851)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let token = TokenResponse::new("secret-access", 60, 60).with_refresh_token("secret-refresh");
        let printed = format!("{token:?}");
        assert!(!printed.contains("secret-access"));
        assert!(!printed.contains("secret-refresh"));
        assert!(printed.contains("expires_in: 60"));
    }

    #[test]
    fn overflowing_lifetime_is_rejected() {
        let body = format!(r#"{{"access_token":"at","expires_in":{}}}"#, i64::MAX);
        let err = TokenResponse::from_json(&body, at(1_000)).unwrap_err();
        assert!(err.to_string().contains("expires_in out of range"));
    }

    #[test]
    fn far_future_expiry_has_no_datetime() {
        let token = TokenResponse::new("at", 60, i64::MAX);
        assert_eq!(token.expires_at_datetime(), None);
        assert_eq!(TokenResponse::new("at", 60, 4_600).expires_at_datetime(), Some(at(4_600)));
    }

    #[test]
    fn soon_expiry_tolerates_extreme_timestamps() {
        let token = TokenResponse::new("at", 1_000, i64::MIN);
        assert!(token.will_soon_expire_at(at(10_000)));
        let token = TokenResponse::new("at", 1_000, i64::MAX);
        assert!(!token.will_soon_expire_at(at(-10_000)));
    }

    #[test]
    fn missing_access_token_is_rejected() {
        assert!(TokenResponse::from_json(r#"{"expires_in":60}"#, at(0)).is_err());
    }
}
