use super::{CredentialProvider, RefreshOptions, RefreshedCredentialProvider};
use crate::assertion::ClientAssertionProvider;
use crate::attestation::AttestedDocumentProvider;
use crate::cache::{Clock, RefreshExecutor, RefreshResult, StaleValueBehavior};
use crate::constants::ENV_CLIENT_SECRET;
use crate::credential::{SecretSupplier, TokenResponse};
use crate::error::CredentialError;
use crate::http::HttpClient;
use crate::oauth2::{fetch_token, ClientAuthentication, TokenAuthnMethod, TokenRequest};
use crate::oidc::OidcTokenProvider;
use crate::prelude::info;
use std::fmt::Debug;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

enum Authenticator {
    ClientSecret {
        method: TokenAuthnMethod,
        secret: Option<SecretSupplier>,
    },
    Assertion(Arc<dyn ClientAssertionProvider>),
    Pkcs7 {
        federated_credential_name: String,
        documents: Arc<dyn AttestedDocumentProvider>,
    },
    Oidc {
        federated_credential_name: String,
        tokens: Arc<dyn OidcTokenProvider>,
    },
    Pca {
        federated_credential_name: String,
        client_x509_certificate: String,
        x509_cert_chains: String,
        assertions: Arc<dyn ClientAssertionProvider>,
    },
}

struct TokenSource {
    client_id: String,
    scope: String,
    token_endpoint: String,
    authenticator: Authenticator,
    http: Arc<dyn HttpClient>,
    clock: Clock,
}

impl TokenSource {
    fn client_secret(secret: Option<&SecretSupplier>) -> Result<String, CredentialError> {
        let secret = match secret {
            Some(supplier) => supplier(),
            None => std::env::var(ENV_CLIENT_SECRET).unwrap_or_default(),
        };
        if secret.trim().is_empty() {
            return Err(CredentialError::blank("client secret"));
        }
        Ok(secret)
    }

    fn authentication(&self) -> Result<ClientAuthentication, CredentialError> {
        let authentication = match &self.authenticator {
            Authenticator::ClientSecret { method, secret } => {
                let client_secret = Self::client_secret(secret.as_ref())?;
                if *method == TokenAuthnMethod::ClientSecretBasic {
                    ClientAuthentication::ClientSecretBasic { client_secret }
                } else {
                    ClientAuthentication::ClientSecretPost { client_secret }
                }
            }
            Authenticator::Assertion(assertions) => ClientAuthentication::ClientAssertion {
                assertion: assertions.client_assertion(&self.client_id, &self.token_endpoint)?,
            },
            Authenticator::Pkcs7 {
                federated_credential_name,
                documents,
            } => ClientAuthentication::Pkcs7 {
                federated_credential_name: federated_credential_name.clone(),
                attested_document: documents.attested_document()?,
            },
            Authenticator::Oidc {
                federated_credential_name,
                tokens,
            } => ClientAuthentication::Oidc {
                federated_credential_name: federated_credential_name.clone(),
                oidc_token: tokens.oidc_token()?,
            },
            Authenticator::Pca {
                federated_credential_name,
                client_x509_certificate,
                x509_cert_chains,
                assertions,
            } => ClientAuthentication::Pca {
                federated_credential_name: federated_credential_name.clone(),
                client_x509_certificate: client_x509_certificate.clone(),
                x509_cert_chains: x509_cert_chains.clone(),
                assertion: assertions.client_assertion(&self.client_id, &self.token_endpoint)?,
            },
        };
        Ok(authentication)
    }

    fn refresh(&self) -> Result<RefreshResult<TokenResponse>, CredentialError> {
        let request = TokenRequest::client_credentials(
            self.token_endpoint.as_str(),
            self.client_id.as_str(),
            self.scope.as_str(),
            self.authentication()?,
        );
        let token = fetch_token(self.http.as_ref(), &request, (self.clock)())?;
        info!("machine credential refreshed for client {}", self.client_id);

        let expires_in = token.expires_in();
        let before_expiry = |fraction: i64| {
            let lead = Duration::seconds(expires_in / fraction);
            token
                .expires_at_datetime()
                .and_then(|expires_at| expires_at.checked_sub(lead))
                .ok_or_else(|| {
                    CredentialError::InvalidResponse(format!(
                        "expiry {} with lifetime {expires_in}s is out of range",
                        token.expires_at()
                    ))
                })
        };
        let stale_time = before_expiry(5)?;
        let prefetch_time = before_expiry(3)?;
        Ok(RefreshResult::builder(token)
            .stale_time(stale_time)
            .prefetch_time(prefetch_time)
            .build())
    }
}

/// Obtains machine-to-machine access tokens with the `client_credentials`
/// grant and keeps them cached.
///
/// A token turns stale when a fifth of its lifetime remains and is prefetched
/// once a third remains.
///
/// # Examples
///
/// ```no_run
/// use idaas_credential::{CredentialProvider, MachineCredentialProvider, TokenAuthnMethod};
/// # fn http() -> std::sync::Arc<dyn idaas_credential::HttpClient> { unimplemented!() }
///
/// let provider = MachineCredentialProvider::builder(http())
///     .client_id("app_xxx")
///     .scope("api.example.com|read")
///     .token_endpoint("https://xxx.aliyunidaas.com/api/v2/iauths_system/oauth2/token")
///     .authn_method(TokenAuthnMethod::ClientSecretPost)
///     .client_secret_supplier(|| std::env::var("APP_SECRET").unwrap_or_default())
///     .build()?;
///
/// let bearer = provider.bearer_token()?;
/// # Ok::<(), idaas_credential::CredentialError>(())
/// ```
pub struct MachineCredentialProvider {
    client_id: String,
    scope: String,
    token_endpoint: String,
    authn_method: TokenAuthnMethod,
    cache: RefreshedCredentialProvider<TokenResponse>,
}

impl Debug for MachineCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineCredentialProvider")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("token_endpoint", &self.token_endpoint)
            .field("authn_method", &self.authn_method)
            .field("cache", &self.cache)
            .finish()
    }
}

impl MachineCredentialProvider {
    /// Starts a builder sending token requests through `http`.
    pub fn builder(http: Arc<dyn HttpClient>) -> MachineCredentialProviderBuilder {
        MachineCredentialProviderBuilder {
            http,
            client_id: String::new(),
            scope: String::new(),
            token_endpoint: String::new(),
            authn_method: TokenAuthnMethod::default(),
            client_secret: None,
            client_assertion_provider: None,
            application_federated_credential_name: None,
            attested_document_provider: None,
            oidc_token_provider: None,
            client_x509_certificate: None,
            x509_cert_chains: None,
            options: RefreshOptions::default(),
            clock: None,
        }
    }

    /// The client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The requested scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The token endpoint.
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// How the client authenticates.
    pub const fn authn_method(&self) -> TokenAuthnMethod {
        self.authn_method
    }

    /// Releases the prefetch strategy. Idempotent.
    pub fn close(&self) {
        self.cache.close();
    }
}

impl CredentialProvider for MachineCredentialProvider {
    fn credential(&self) -> Result<TokenResponse, CredentialError> {
        Ok(self.cache.get()?)
    }
}

/// Builder for [`MachineCredentialProvider`].
pub struct MachineCredentialProviderBuilder {
    http: Arc<dyn HttpClient>,
    client_id: String,
    scope: String,
    token_endpoint: String,
    authn_method: TokenAuthnMethod,
    client_secret: Option<SecretSupplier>,
    client_assertion_provider: Option<Arc<dyn ClientAssertionProvider>>,
    application_federated_credential_name: Option<String>,
    attested_document_provider: Option<Arc<dyn AttestedDocumentProvider>>,
    oidc_token_provider: Option<Arc<dyn OidcTokenProvider>>,
    client_x509_certificate: Option<String>,
    x509_cert_chains: Option<String>,
    options: RefreshOptions,
    clock: Option<Clock>,
}

impl Debug for MachineCredentialProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineCredentialProviderBuilder")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("token_endpoint", &self.token_endpoint)
            .field("authn_method", &self.authn_method)
            .field(
                "application_federated_credential_name",
                &self.application_federated_credential_name,
            )
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, CredentialError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CredentialError::blank(field))
}

fn present<T: ?Sized>(value: Option<Arc<T>>, field: &str) -> Result<Arc<T>, CredentialError> {
    value.ok_or_else(|| CredentialError::InvalidArgument(format!("{field} is required")))
}

impl MachineCredentialProviderBuilder {
    /// The client id. Required.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// The scope to request. Required.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// The token endpoint. Required.
    #[must_use]
    pub fn token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// How the client authenticates. Defaults to `CLIENT_SECRET_POST`.
    #[must_use]
    pub fn authn_method(mut self, method: TokenAuthnMethod) -> Self {
        self.authn_method = method;
        self
    }

    /// Source of the client secret for the `CLIENT_SECRET_*` methods. Without
    /// one, `ALIBABA_CLOUD_EIAM_APP_CLIENT_SECRET` is read on every refresh.
    #[must_use]
    pub fn client_secret_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.client_secret = Some(Arc::new(supplier));
        self
    }

    /// Signs client assertions for `CLIENT_SECRET_JWT`, `PRIVATE_KEY_JWT` and `PCA`.
    #[must_use]
    pub fn client_assertion_provider(mut self, provider: Arc<dyn ClientAssertionProvider>) -> Self {
        self.client_assertion_provider = Some(provider);
        self
    }

    /// Federated credential registered for `PKCS7`, `OIDC` and `PCA`.
    #[must_use]
    pub fn application_federated_credential_name(mut self, name: impl Into<String>) -> Self {
        self.application_federated_credential_name = Some(name.into());
        self
    }

    /// Source of attested documents for `PKCS7`.
    #[must_use]
    pub fn attested_document_provider(mut self, provider: Arc<dyn AttestedDocumentProvider>) -> Self {
        self.attested_document_provider = Some(provider);
        self
    }

    /// Source of ID tokens for `OIDC`.
    #[must_use]
    pub fn oidc_token_provider(mut self, provider: Arc<dyn OidcTokenProvider>) -> Self {
        self.oidc_token_provider = Some(provider);
        self
    }

    /// Client certificate for `PCA`.
    #[must_use]
    pub fn client_x509_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.client_x509_certificate = Some(certificate.into());
        self
    }

    /// Certificate chain for `PCA`.
    #[must_use]
    pub fn x509_cert_chains(mut self, chains: impl Into<String>) -> Self {
        self.x509_cert_chains = Some(chains.into());
        self
    }

    /// Refresh tokens in the background.
    #[must_use]
    pub fn async_credential_update_enabled(mut self, enabled: bool) -> Self {
        self.options.async_credential_update_enabled = enabled;
        self
    }

    /// Policy when a stale token cannot be refreshed. Defaults to strict.
    #[must_use]
    pub fn stale_value_behavior(mut self, behavior: StaleValueBehavior) -> Self {
        self.options.cache.stale_value_behavior = behavior;
        self
    }

    /// Executor for background refreshes.
    #[must_use]
    pub fn executor(mut self, executor: RefreshExecutor) -> Self {
        self.options.executor = Some(executor);
        self
    }

    /// Replaces all refresh options at once.
    #[must_use]
    pub fn refresh_options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    /// Source of the current instant.
    #[must_use]
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> OffsetDateTime + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    fn authenticator(&mut self) -> Result<Authenticator, CredentialError> {
        let authenticator = match self.authn_method {
            TokenAuthnMethod::ClientSecretBasic | TokenAuthnMethod::ClientSecretPost => {
                Authenticator::ClientSecret {
                    method: self.authn_method,
                    secret: self.client_secret.take(),
                }
            }
            TokenAuthnMethod::ClientSecretJwt | TokenAuthnMethod::PrivateKeyJwt => {
                Authenticator::Assertion(present(
                    self.client_assertion_provider.take(),
                    "client assertion provider",
                )?)
            }
            TokenAuthnMethod::Pkcs7 => Authenticator::Pkcs7 {
                federated_credential_name: required(
                    self.application_federated_credential_name.take(),
                    "application federated credential name",
                )?,
                documents: present(
                    self.attested_document_provider.take(),
                    "attested document provider",
                )?,
            },
            TokenAuthnMethod::Oidc => Authenticator::Oidc {
                federated_credential_name: required(
                    self.application_federated_credential_name.take(),
                    "application federated credential name",
                )?,
                tokens: present(self.oidc_token_provider.take(), "oidc token provider")?,
            },
            TokenAuthnMethod::Pca => Authenticator::Pca {
                federated_credential_name: required(
                    self.application_federated_credential_name.take(),
                    "application federated credential name",
                )?,
                client_x509_certificate: required(
                    self.client_x509_certificate.take(),
                    "client x509 certificate",
                )?,
                x509_cert_chains: required(self.x509_cert_chains.take(), "x509 cert chains")?,
                assertions: present(
                    self.client_assertion_provider.take(),
                    "client assertion provider",
                )?,
            },
            TokenAuthnMethod::None => {
                return Err(CredentialError::UnsupportedAuthnMethod(self.authn_method))
            }
        };
        Ok(authenticator)
    }

    /// Validates the settings and builds the provider. No token is requested
    /// until first use.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::InvalidArgument`] for a blank client id, scope or
    ///   token endpoint, or a collaborator missing for the chosen method,
    /// - [`CredentialError::UnsupportedAuthnMethod`] for `NONE`.
    pub fn build(mut self) -> Result<MachineCredentialProvider, CredentialError> {
        if self.client_id.trim().is_empty() {
            return Err(CredentialError::blank("client id"));
        }
        if self.scope.trim().is_empty() {
            return Err(CredentialError::blank("scope"));
        }
        if self.token_endpoint.trim().is_empty() {
            return Err(CredentialError::blank("token endpoint"));
        }
        let authenticator = self.authenticator()?;

        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(OffsetDateTime::now_utc),
        };
        let source = TokenSource {
            client_id: self.client_id.clone(),
            scope: self.scope.clone(),
            token_endpoint: self.token_endpoint.clone(),
            authenticator,
            http: self.http,
            clock: Arc::clone(&clock),
        };
        let cache = RefreshedCredentialProvider::with_clock(
            move || source.refresh(),
            self.options,
            move || clock(),
        );

        Ok(MachineCredentialProvider {
            client_id: self.client_id,
            scope: self.scope,
            token_endpoint: self.token_endpoint,
            authn_method: self.authn_method,
            cache,
        })
    }
}
