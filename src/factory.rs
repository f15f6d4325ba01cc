//! Builds credential providers from a [`ClientConfig`].

use crate::assertion::{ClientSecretAssertionProvider, PrivateKeyAssertionProvider};
use crate::attestation::{
    AlibabaCloudEcsAttestedDocumentProvider, AttestedDocumentProvider,
    AwsEc2AttestedDocumentProvider, StaticAttestedDocumentProvider,
};
use crate::cache::{RefreshExecutor, MAX_CONCURRENT_REFRESHES};
use crate::config::{AuthnConfiguration, ClientConfig, ClientDeployEnvironment, ConfigError, HttpConfiguration};
use crate::error::CredentialError;
use crate::http::HttpClient;
use crate::oauth2::TokenAuthnMethod;
use crate::oidc::{FileOidcTokenProvider, OidcTokenProvider, StaticOidcTokenProvider};
use crate::prelude::{debug, warn};
use crate::provider::{MachineCredentialProvider, MachineCredentialProviderBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Composition root turning a validated [`ClientConfig`] into
/// [`MachineCredentialProvider`]s.
///
/// One provider is created per scope and reused. All providers share the
/// factory's [`RefreshExecutor`] for background refreshes.
///
/// # Examples
///
/// ```no_run
/// use idaas_credential::{CredentialProvider, CredentialProviderFactory};
///
/// let factory = CredentialProviderFactory::load(None)?;
/// let token = factory.provider()?.bearer_token()?;
/// # Ok::<(), idaas_credential::CredentialError>(())
/// ```
pub struct CredentialProviderFactory {
    config: ClientConfig,
    http: Arc<dyn HttpClient>,
    executor: RefreshExecutor,
    async_credential_update_enabled: bool,
    providers: Mutex<HashMap<String, Arc<MachineCredentialProvider>>>,
}

impl Debug for CredentialProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProviderFactory")
            .field("config", &self.config)
            .field("http", &"<HttpClient>")
            .field("executor", &self.executor)
            .field(
                "async_credential_update_enabled",
                &self.async_credential_update_enabled,
            )
            .field("scopes", &self.providers.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialProviderFactory {
    /// Validates `config` and creates a factory sending requests through `http`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Config`] if the configuration is invalid.
    pub fn new(config: ClientConfig, http: Arc<dyn HttpClient>) -> Result<Self, CredentialError> {
        config.validate()?;
        Ok(Self {
            config,
            http,
            executor: RefreshExecutor::new(MAX_CONCURRENT_REFRESHES),
            async_credential_update_enabled: false,
            providers: Mutex::new(HashMap::new()),
        })
    }

    /// Same as [`CredentialProviderFactory::new`] with a `reqwest` client built
    /// from the configured HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the configuration is invalid or the
    /// HTTP client cannot be created.
    #[cfg(feature = "http-reqwest")]
    pub fn from_config(config: ClientConfig) -> Result<Self, CredentialError> {
        let http = crate::http::ReqwestHttpClient::from_config(&config.http_configuration)?;
        Self::new(config, Arc::new(http))
    }

    /// Loads the configuration (see [`ClientConfig::load`]) and builds a
    /// factory with a `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the configuration cannot be loaded or
    /// is invalid.
    #[cfg(feature = "http-reqwest")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, CredentialError> {
        Self::from_config(ClientConfig::load(path)?)
    }

    /// Replaces the executor used for background refreshes.
    #[must_use]
    pub fn with_executor(mut self, executor: RefreshExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Refresh credentials in the background instead of on the calling thread.
    #[must_use]
    pub fn with_async_credential_update(mut self, enabled: bool) -> Self {
        self.async_credential_update_enabled = enabled;
        self
    }

    /// Provider for the configured default scope.
    ///
    /// # Errors
    ///
    /// See [`CredentialProviderFactory::provider_for_scope`].
    pub fn provider(&self) -> Result<Arc<MachineCredentialProvider>, CredentialError> {
        self.provider_for_scope(&self.config.scope)
    }

    /// Provider for `scope`, created on first request.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the scope is blank or the key material
    /// named by the configuration is unusable.
    pub fn provider_for_scope(
        &self,
        scope: &str,
    ) -> Result<Arc<MachineCredentialProvider>, CredentialError> {
        if scope.trim().is_empty() {
            return Err(CredentialError::blank("scope"));
        }
        let mut providers = self.providers.lock();
        if let Some(provider) = providers.get(scope) {
            return Ok(Arc::clone(provider));
        }
        let provider = Arc::new(self.create_provider(scope)?);
        debug!("created credential provider for scope {scope}");
        providers.insert(scope.to_owned(), Arc::clone(&provider));
        Ok(provider)
    }

    /// The configuration the factory was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The developer API endpoint.
    pub fn developer_api_endpoint(&self) -> &str {
        self.config.developer_api_endpoint.as_deref().unwrap_or_default()
    }

    /// The IDaaS instance id.
    pub fn idaas_instance_id(&self) -> &str {
        self.config.idaas_instance_id.as_deref().unwrap_or_default()
    }

    /// The HTTP settings.
    pub fn http_configuration(&self) -> &HttpConfiguration {
        &self.config.http_configuration
    }

    /// The executor shared by this factory's providers.
    pub fn executor(&self) -> &RefreshExecutor {
        &self.executor
    }

    /// Closes every provider and shuts the executor down. Providers handed
    /// out earlier keep serving cached values and refresh on the calling thread
    /// only.
    pub fn shutdown(&self) {
        let providers: Vec<_> = self.providers.lock().drain().map(|(_, p)| p).collect();
        for provider in providers {
            provider.close();
        }
        self.executor.shutdown();
    }

    fn authn(&self) -> Result<&AuthnConfiguration, CredentialError> {
        Ok(self
            .config
            .authn()
            .ok_or(ConfigError::MissingField("authnConfiguration"))?)
    }

    fn create_provider(&self, scope: &str) -> Result<MachineCredentialProvider, CredentialError> {
        let authn = self.authn()?;
        let builder = MachineCredentialProvider::builder(Arc::clone(&self.http))
            .client_id(self.config.client_id.as_deref().unwrap_or_default())
            .scope(scope)
            .token_endpoint(self.config.token_endpoint.as_deref().unwrap_or_default())
            .authn_method(authn.authn_method)
            .async_credential_update_enabled(self.async_credential_update_enabled)
            .executor(self.executor.clone());

        let builder = match authn.authn_method {
            TokenAuthnMethod::ClientSecretBasic | TokenAuthnMethod::ClientSecretPost => {
                match authn.client_secret_env_var_name.clone() {
                    Some(name) => builder.client_secret_supplier(env_secret(name)),
                    None => builder,
                }
            }
            TokenAuthnMethod::ClientSecretJwt => match authn.client_secret_env_var_name.clone() {
                Some(name) => builder.client_assertion_provider(Arc::new(
                    ClientSecretAssertionProvider::new(env_secret(name)),
                )),
                None => builder,
            },
            TokenAuthnMethod::PrivateKeyJwt => self.with_private_key(builder, authn)?,
            TokenAuthnMethod::Pkcs7 => builder
                .application_federated_credential_name(
                    authn
                        .application_federated_credential_name
                        .clone()
                        .unwrap_or_default(),
                )
                .attested_document_provider(self.attested_document_provider(authn)?),
            TokenAuthnMethod::Oidc => builder
                .application_federated_credential_name(
                    authn
                        .application_federated_credential_name
                        .clone()
                        .unwrap_or_default(),
                )
                .oidc_token_provider(oidc_token_provider(authn)),
            TokenAuthnMethod::Pca => {
                let builder = builder
                    .application_federated_credential_name(
                        authn
                            .application_federated_credential_name
                            .clone()
                            .unwrap_or_default(),
                    )
                    .client_x509_certificate(
                        authn.client_x509_certificate.clone().unwrap_or_default(),
                    )
                    .x509_cert_chains(authn.x509_cert_chains.clone().unwrap_or_default());
                self.with_private_key(builder, authn)?
            }
            TokenAuthnMethod::None => {
                return Err(ConfigError::UnsupportedAuthnMethod(authn.authn_method).into())
            }
        };
        builder.build()
    }

    fn with_private_key(
        &self,
        builder: MachineCredentialProviderBuilder,
        authn: &AuthnConfiguration,
    ) -> Result<MachineCredentialProviderBuilder, CredentialError> {
        let Some(name) = authn.private_key_env_var_name.as_deref() else {
            return Ok(builder);
        };
        let pem = std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(name.to_owned()))?;
        let assertions = PrivateKeyAssertionProvider::from_pem(&pem)?;
        Ok(builder.client_assertion_provider(Arc::new(assertions)))
    }

    fn attested_document_provider(
        &self,
        authn: &AuthnConfiguration,
    ) -> Result<Arc<dyn AttestedDocumentProvider>, CredentialError> {
        let provider: Arc<dyn AttestedDocumentProvider> = match authn.client_deploy_environment {
            Some(ClientDeployEnvironment::AlibabaCloudEcs) => Arc::new(
                AlibabaCloudEcsAttestedDocumentProvider::builder(
                    self.idaas_instance_id(),
                    Arc::clone(&self.http),
                )
                .async_credential_update_enabled(self.async_credential_update_enabled)
                .executor(self.executor.clone())
                .build()?,
            ),
            Some(ClientDeployEnvironment::AwsEc2) => Arc::new(AwsEc2AttestedDocumentProvider),
            _ => Arc::new(StaticAttestedDocumentProvider::default()),
        };
        Ok(provider)
    }
}

fn env_secret(name: String) -> impl Fn() -> String + Send + Sync + 'static {
    move || match std::env::var(&name) {
        Ok(secret) => secret,
        Err(_) => {
            warn!("environment variable {name} holding the client secret is not set");
            String::new()
        }
    }
}

fn oidc_token_provider(authn: &AuthnConfiguration) -> Arc<dyn OidcTokenProvider> {
    if let Some(name) = authn.oidc_token_file_path_env_var_name.as_deref() {
        return match std::env::var(name) {
            Ok(path) if !path.trim().is_empty() => Arc::new(FileOidcTokenProvider::new(path)),
            _ => Arc::new(StaticOidcTokenProvider::default()),
        };
    }
    match authn.oidc_token_file_path.as_deref() {
        Some(path) if !path.trim().is_empty() => Arc::new(FileOidcTokenProvider::new(path)),
        _ => Arc::new(StaticOidcTokenProvider::default()),
    }
}
