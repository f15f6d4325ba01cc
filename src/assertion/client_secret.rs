use super::{AssertionClaims, AssertionError, ClientAssertionProvider};
use crate::credential::SecretSupplier;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::fmt::Debug;
use std::sync::Arc;
use time::OffsetDateTime;
use zeroize::Zeroizing;

/// Signs assertions with the client secret (`client_secret_jwt`, HS256).
///
/// The secret is read from the supplier on every call so rotated secrets are
/// picked up without rebuilding the provider.
#[derive(Clone)]
pub struct ClientSecretAssertionProvider {
    client_secret: SecretSupplier,
}

impl Debug for ClientSecretAssertionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretAssertionProvider")
            .field("client_secret", &"<SecretSupplier>")
            .finish()
    }
}

impl ClientSecretAssertionProvider {
    /// Creates a provider reading the HMAC key from `client_secret`.
    pub fn new<F>(client_secret: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            client_secret: Arc::new(client_secret),
        }
    }

    /// Creates a provider from an already shared supplier.
    pub fn from_supplier(client_secret: SecretSupplier) -> Self {
        Self { client_secret }
    }
}

impl ClientAssertionProvider for ClientSecretAssertionProvider {
    fn client_assertion(
        &self,
        client_id: &str,
        token_endpoint: &str,
    ) -> Result<String, AssertionError> {
        let claims = AssertionClaims::new(client_id, token_endpoint, OffsetDateTime::now_utc())?;
        let secret = Zeroizing::new((self.client_secret)());
        if secret.is_empty() {
            return Err(AssertionError::BlankSecret);
        }
        let key = EncodingKey::from_secret(secret.as_bytes());
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &key)?)
    }
}
