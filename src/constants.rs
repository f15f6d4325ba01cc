//! Wire-level names and well-known values.

/// OAuth2 `grant_type` used for machine-to-machine token requests.
pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";

/// Assertion type for JWT client assertions (RFC 7523).
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Assertion type for cloud-platform PKCS#7 attested documents.
pub const CLIENT_ASSERTION_TYPE_PKCS7_BEARER: &str =
    "urn:cloud:idaas:params:oauth:client-assertion-type:pkcs7-bearer";

/// Assertion type for federated OIDC ID tokens.
pub const CLIENT_ASSERTION_TYPE_ID_TOKEN_BEARER: &str =
    "urn:cloud:idaas:params:oauth:client-assertion-type:id-token-bearer";

/// Assertion type for private-CA backed JWT assertions.
pub const CLIENT_ASSERTION_TYPE_X509_JWT_BEARER: &str =
    "urn:cloud:idaas:params:oauth:client-assertion-type:x509-jwt-bearer";

/// Form parameter names of the token endpoint.
pub mod param {
    #![allow(missing_docs)]

    pub const GRANT_TYPE: &str = "grant_type";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const SCOPE: &str = "scope";
    pub const CLIENT_ASSERTION_TYPE: &str = "client_assertion_type";
    pub const CLIENT_ASSERTION: &str = "client_assertion";
    pub const APPLICATION_FEDERATED_CREDENTIAL_NAME: &str = "application_federated_credential_name";
    pub const CLIENT_X509: &str = "client_x509";
    pub const CLIENT_X509_CHAIN: &str = "client_x509_chain";
}

/// Default scope requested when the configuration names none.
pub const DEFAULT_SCOPE: &str = "urn:cloud:idaas:pam|cloud_account:obtain_access_credential";

/// Environment variable holding the client secret when none is configured.
pub const ENV_CLIENT_SECRET: &str = "ALIBABA_CLOUD_EIAM_APP_CLIENT_SECRET";

/// Environment variable pointing at the client configuration file.
pub const ENV_CONFIG_PATH: &str = "CLOUD_IDAAS_CONFIG_PATH";

/// Configuration file location relative to the home directory.
pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".cloud_idaas/client-config.json";
