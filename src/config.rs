//! Client configuration file model, discovery and validation.
//!
//! The configuration is a camelCase JSON document, usually at
//! `~/.cloud_idaas/client-config.json`:
//!
//! ```json
//! {
//!   "idaasInstanceId": "idaas_xxx",
//!   "clientId": "app_xxx",
//!   "issuer": "https://xxx.aliyunidaas.com/api/v2/iauths_system/oauth2",
//!   "tokenEndpoint": "https://xxx.aliyunidaas.com/api/v2/iauths_system/oauth2/token",
//!   "scope": "api.example.com|read",
//!   "developerApiEndpoint": "https://eiam-developerapi.cn-hangzhou.aliyuncs.com",
//!   "authnConfiguration": {
//!     "identityType": "CLIENT",
//!     "authnMethod": "CLIENT_SECRET_POST",
//!     "clientSecretEnvVarName": "IDAAS_CLIENT_SECRET"
//!   }
//! }
//! ```

use crate::constants::{DEFAULT_CONFIG_RELATIVE_PATH, DEFAULT_SCOPE, ENV_CONFIG_PATH};
use crate::oauth2::TokenAuthnMethod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Lower bound for HTTP timeouts, in milliseconds.
pub const MIN_HTTP_TIMEOUT_MILLIS: u64 = 2_000;

/// Upper bound for HTTP timeouts, in milliseconds.
pub const MAX_HTTP_TIMEOUT_MILLIS: u64 = 60_000;

/// Errors produced while loading or validating a [`ClientConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No path was given, `CLOUD_IDAAS_CONFIG_PATH` is unset and the default
    /// file does not exist.
    #[error("idaas client config not specified")]
    NotSpecified,

    /// An explicitly requested file does not exist.
    #[error("idaas client config file not found at {0}; set CLOUD_IDAAS_CONFIG_PATH to point at it")]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// The config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The document is not a valid client configuration.
    #[error("invalid client config")]
    Parse(#[from] serde_json::Error),

    /// A required setting is missing or blank.
    #[error("{0} not found")]
    MissingField(&'static str),

    /// An HTTP timeout is out of range.
    #[error("{field} must be between {MIN_HTTP_TIMEOUT_MILLIS} and {MAX_HTTP_TIMEOUT_MILLIS} ms, got {value}")]
    InvalidTimeout {
        /// The offending setting.
        field: &'static str,
        /// Its value in milliseconds.
        value: u64,
    },

    /// Human (device flow) authentication is not supported.
    #[error("human identity authentication is not supported")]
    HumanIdentityUnsupported,

    /// The configured authentication method cannot be used.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthnMethod(TokenAuthnMethod),

    /// An environment variable named by the configuration is not set.
    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),
}

/// Who is authenticating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityType {
    /// A workload using its own client credentials.
    #[default]
    Client,
    /// A person using the device authorization flow.
    Human,
}

/// Where the client runs. Selects the attested document source for `PKCS7`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ClientDeployEnvironment {
    Common,
    Computer,
    Kubernetes,
    AlibabaCloudEcs,
    AlibabaCloudEci,
    AlibabaCloudAck,
    AwsEc2,
    AwsEsk,
    GoogleVm,
    HuaweiCloudEcs,
    Custom,
}

/// How the client authenticates to the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthnConfiguration {
    /// Identity type. `authenticationSubject` is accepted as an alias.
    #[serde(alias = "authenticationSubject")]
    pub identity_type: IdentityType,
    /// Authentication method. Defaults to `NONE`, which is rejected.
    pub authn_method: TokenAuthnMethod,
    /// Environment variable holding the client secret.
    pub client_secret_env_var_name: Option<String>,
    /// Environment variable holding the PEM private key.
    pub private_key_env_var_name: Option<String>,
    /// Federated credential registered for `PKCS7`, `OIDC` and `PCA`.
    pub application_federated_credential_name: Option<String>,
    /// Deployment environment.
    pub client_deploy_environment: Option<ClientDeployEnvironment>,
    /// Environment variable holding the path of the OIDC token file.
    pub oidc_token_file_path_env_var_name: Option<String>,
    /// Path of the OIDC token file.
    pub oidc_token_file_path: Option<String>,
    /// Client certificate for `PCA`.
    pub client_x509_certificate: Option<String>,
    /// Certificate chain for `PCA`.
    pub x509_cert_chains: Option<String>,
}

impl Default for AuthnConfiguration {
    fn default() -> Self {
        Self {
            identity_type: IdentityType::Client,
            authn_method: TokenAuthnMethod::None,
            client_secret_env_var_name: None,
            private_key_env_var_name: None,
            application_federated_credential_name: None,
            client_deploy_environment: None,
            oidc_token_file_path_env_var_name: None,
            oidc_token_file_path: None,
            client_x509_certificate: None,
            x509_cert_chains: None,
        }
    }
}

/// Outgoing HTTP settings, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfiguration {
    /// Connect timeout.
    pub connect_timeout: u64,
    /// Read timeout.
    pub read_timeout: u64,
    /// Skip TLS certificate verification. Never enable in production.
    pub unsafe_ignore_ssl_cert: bool,
}

impl Default for HttpConfiguration {
    fn default() -> Self {
        Self {
            connect_timeout: 5_000,
            read_timeout: 10_000,
            unsafe_ignore_ssl_cert: false,
        }
    }
}

impl HttpConfiguration {
    /// Connect timeout as a [`Duration`].
    pub const fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    /// Read timeout as a [`Duration`].
    pub const fn read_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }

    /// Checks that both timeouts lie in `[2000, 60000]` ms.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTimeout`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let range = MIN_HTTP_TIMEOUT_MILLIS..=MAX_HTTP_TIMEOUT_MILLIS;
        if !range.contains(&self.connect_timeout) {
            return Err(ConfigError::InvalidTimeout {
                field: "connectTimeout",
                value: self.connect_timeout,
            });
        }
        if !range.contains(&self.read_timeout) {
            return Err(ConfigError::InvalidTimeout {
                field: "readTimeout",
                value: self.read_timeout,
            });
        }
        Ok(())
    }
}

/// The client configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// IDaaS instance id; also the audience of attested documents.
    pub idaas_instance_id: Option<String>,
    /// OAuth2 client id.
    pub client_id: Option<String>,
    /// Default scope.
    pub scope: String,
    /// Issuer URL.
    pub issuer: Option<String>,
    /// Token endpoint URL.
    pub token_endpoint: Option<String>,
    /// Device authorization endpoint URL (human identities only).
    pub device_authorization_endpoint: Option<String>,
    /// Developer API endpoint URL.
    pub developer_api_endpoint: Option<String>,
    /// Authentication settings.
    pub authn_configuration: Option<AuthnConfiguration>,
    /// HTTP settings.
    pub http_configuration: HttpConfiguration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            idaas_instance_id: None,
            client_id: None,
            scope: DEFAULT_SCOPE.to_owned(),
            issuer: None,
            token_endpoint: None,
            device_authorization_endpoint: None,
            developer_api_endpoint: None,
            authn_configuration: None,
            http_configuration: HttpConfiguration::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("idaas_instance_id", &self.idaas_instance_id)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("issuer", &self.issuer)
            .field("token_endpoint", &self.token_endpoint)
            .field("developer_api_endpoint", &self.developer_api_endpoint)
            .field(
                "authn_method",
                &self.authn_configuration.as_ref().map(|a| a.authn_method),
            )
            .field("http_configuration", &self.http_configuration)
            .finish_non_exhaustive()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn require(value: Option<&str>, field: &'static str) -> Result<(), ConfigError> {
    if is_blank(value) {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}

// Returns the file to read and whether it was requested explicitly.
fn resolve_path(
    explicit: Option<&Path>,
    env_path: Option<String>,
    home: Option<PathBuf>,
) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((expand_home(path, home.as_deref()), true));
    }
    if let Some(path) = env_path.filter(|p| !p.trim().is_empty()) {
        return Some((expand_home(Path::new(&path), home.as_deref()), true));
    }
    home.map(|h| (h.join(DEFAULT_CONFIG_RELATIVE_PATH), false))
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl ClientConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads the configuration from `path`, else from `CLOUD_IDAAS_CONFIG_PATH`,
    /// else from `~/.cloud_idaas/client-config.json`. A leading `~` is
    /// expanded. The result is not validated.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotSpecified`] if the default file does not exist,
    /// - [`ConfigError::NotFound`] if an explicitly requested file does not exist,
    /// - [`ConfigError::Io`] / [`ConfigError::Parse`] if it cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let home = dirs::home_dir();
        let env_path = std::env::var(ENV_CONFIG_PATH).ok();
        let (path, explicit) =
            resolve_path(path, env_path, home).ok_or(ConfigError::NotSpecified)?;

        if !path.exists() {
            return Err(if explicit {
                ConfigError::NotFound(path)
            } else {
                ConfigError::NotSpecified
            });
        }
        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The authentication settings, if present.
    pub fn authn(&self) -> Option<&AuthnConfiguration> {
        self.authn_configuration.as_ref()
    }

    /// Checks everything a machine credential provider needs.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingField`] for a missing endpoint, id or
    ///   method-specific setting,
    /// - [`ConfigError::HumanIdentityUnsupported`] for `HUMAN` identities,
    /// - [`ConfigError::UnsupportedAuthnMethod`] for `NONE`,
    /// - [`ConfigError::InvalidTimeout`] for out-of-range HTTP timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(self.idaas_instance_id.as_deref(), "idaasInstanceId")?;
        require(self.client_id.as_deref(), "clientId")?;
        require(self.issuer.as_deref(), "issuer")?;
        require(self.token_endpoint.as_deref(), "tokenEndpoint")?;
        require(self.developer_api_endpoint.as_deref(), "developerApiEndpoint")?;

        let authn = self
            .authn()
            .ok_or(ConfigError::MissingField("authnConfiguration"))?;
        if authn.identity_type == IdentityType::Human {
            return Err(ConfigError::HumanIdentityUnsupported);
        }
        match authn.authn_method {
            TokenAuthnMethod::ClientSecretBasic
            | TokenAuthnMethod::ClientSecretPost
            | TokenAuthnMethod::ClientSecretJwt => require(
                authn.client_secret_env_var_name.as_deref(),
                "clientSecretEnvVarName",
            )?,
            TokenAuthnMethod::PrivateKeyJwt => require(
                authn.private_key_env_var_name.as_deref(),
                "privateKeyEnvVarName",
            )?,
            TokenAuthnMethod::Pkcs7 | TokenAuthnMethod::Oidc => {
                require(
                    authn.application_federated_credential_name.as_deref(),
                    "applicationFederatedCredentialName",
                )?;
                if authn.client_deploy_environment.is_none() {
                    return Err(ConfigError::MissingField("clientDeployEnvironment"));
                }
            }
            TokenAuthnMethod::Pca => {
                require(
                    authn.application_federated_credential_name.as_deref(),
                    "applicationFederatedCredentialName",
                )?;
                require(authn.client_x509_certificate.as_deref(), "clientX509Certificate")?;
                require(authn.x509_cert_chains.as_deref(), "x509CertChains")?;
                require(
                    authn.private_key_env_var_name.as_deref(),
                    "privateKeyEnvVarName",
                )?;
            }
            TokenAuthnMethod::None => {
                return Err(ConfigError::UnsupportedAuthnMethod(authn.authn_method))
            }
        }
        self.http_configuration.validate()
    }
}
