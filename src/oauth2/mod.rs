//! Token endpoint requests.
//!
//! Every machine-to-machine request uses the `client_credentials` grant and
//! differs only in how the client authenticates. [`TokenRequest`] turns a
//! [`ClientAuthentication`] into the exact form body and headers the identity
//! provider expects.

use crate::constants::{
    param, CLIENT_ASSERTION_TYPE_ID_TOKEN_BEARER, CLIENT_ASSERTION_TYPE_JWT_BEARER,
    CLIENT_ASSERTION_TYPE_PKCS7_BEARER, CLIENT_ASSERTION_TYPE_X509_JWT_BEARER,
    GRANT_TYPE_CLIENT_CREDENTIALS,
};
use crate::credential::TokenResponse;
use crate::http::{HttpClient, HttpError, HttpRequest};
use base64ct::{Base64, Encoding as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use zeroize::Zeroize;

/// Grant type of an RFC 8693 token exchange.
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

const SUBJECT_TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
const REQUESTED_TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// OAuth2 error code returned while a device authorization is still pending.
pub const ERROR_AUTHORIZATION_PENDING: &str = "authorization_pending";

/// OAuth2 error code asking the client to poll less often.
pub const ERROR_SLOW_DOWN: &str = "slow_down";

/// How a client authenticates to the token endpoint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenAuthnMethod {
    /// No client authentication.
    None,
    /// Shared secret in the form body.
    #[default]
    ClientSecretPost,
    /// Shared secret in an HTTP Basic `Authorization` header.
    ClientSecretBasic,
    /// JWT assertion signed with the client secret (HS256).
    ClientSecretJwt,
    /// JWT assertion signed with a private key (RS256 / ES256).
    PrivateKeyJwt,
    /// Cloud-platform PKCS#7 attested document.
    Pkcs7,
    /// Private-CA certificate plus a JWT assertion signed by its key.
    Pca,
    /// Federated OIDC ID token.
    Oidc,
}

impl TokenAuthnMethod {
    /// Returns the configuration name of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ClientSecretPost => "CLIENT_SECRET_POST",
            Self::ClientSecretBasic => "CLIENT_SECRET_BASIC",
            Self::ClientSecretJwt => "CLIENT_SECRET_JWT",
            Self::PrivateKeyJwt => "PRIVATE_KEY_JWT",
            Self::Pkcs7 => "PKCS7",
            Self::Pca => "PCA",
            Self::Oidc => "OIDC",
        }
    }

    /// Every method, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::None,
        Self::ClientSecretPost,
        Self::ClientSecretBasic,
        Self::ClientSecretJwt,
        Self::PrivateKeyJwt,
        Self::Pkcs7,
        Self::Pca,
        Self::Oidc,
    ];
}

impl fmt::Display for TokenAuthnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`TokenAuthnMethod`].
#[derive(Debug, thiserror::Error)]
#[error("unsupported authentication method: {0}")]
pub struct ParseTokenAuthnMethodError(String);

impl FromStr for TokenAuthnMethod {
    type Err = ParseTokenAuthnMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseTokenAuthnMethodError(s.to_owned()))
    }
}

/// Client authentication material for one token request.
///
/// Secrets are zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub enum ClientAuthentication {
    /// `client_secret_basic`.
    ClientSecretBasic {
        /// The shared secret.
        client_secret: String,
    },
    /// `client_secret_post`.
    ClientSecretPost {
        /// The shared secret.
        client_secret: String,
    },
    /// Signed JWT assertion (`client_secret_jwt` or `private_key_jwt`).
    ClientAssertion {
        /// Compact JWS.
        assertion: String,
    },
    /// PKCS#7 attested document from the hosting platform.
    Pkcs7 {
        /// Name of the federated credential registered for the application.
        federated_credential_name: String,
        /// Base64 PKCS#7 document.
        attested_document: String,
    },
    /// Federated OIDC ID token.
    Oidc {
        /// Name of the federated credential registered for the application.
        federated_credential_name: String,
        /// The ID token.
        oidc_token: String,
    },
    /// Private-CA certificate plus assertion.
    Pca {
        /// Name of the federated credential registered for the application.
        federated_credential_name: String,
        /// Client certificate.
        client_x509_certificate: String,
        /// Intermediate chain.
        x509_cert_chains: String,
        /// Assertion signed by the certificate's key.
        assertion: String,
    },
}

impl fmt::Debug for ClientAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::ClientSecretBasic { .. } => "ClientSecretBasic",
            Self::ClientSecretPost { .. } => "ClientSecretPost",
            Self::ClientAssertion { .. } => "ClientAssertion",
            Self::Pkcs7 { .. } => "Pkcs7",
            Self::Oidc { .. } => "Oidc",
            Self::Pca { .. } => "Pca",
        };
        f.write_str(kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Grant {
    ClientCredentials {
        client_id: String,
        authentication: ClientAuthentication,
    },
    TokenExchange {
        audience: String,
        subject_token: String,
    },
}

/// A request to the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequest {
    token_endpoint: String,
    scope: String,
    grant: Grant,
}

impl TokenRequest {
    /// A `client_credentials` request.
    pub fn client_credentials(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        authentication: ClientAuthentication,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            scope: scope.into(),
            grant: Grant::ClientCredentials {
                client_id: client_id.into(),
                authentication,
            },
        }
    }

    /// An RFC 8693 exchange of a JWT `subject_token` for an access token
    /// intended for `audience`.
    pub fn token_exchange(
        token_endpoint: impl Into<String>,
        audience: impl Into<String>,
        subject_token: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            scope: scope.into(),
            grant: Grant::TokenExchange {
                audience: audience.into(),
                subject_token: subject_token.into(),
            },
        }
    }

    /// Target token endpoint.
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Builds the HTTP request sent to the token endpoint.
    pub fn to_http_request(&self) -> HttpRequest {
        let request = HttpRequest::post(self.token_endpoint.as_str());
        match &self.grant {
            Grant::ClientCredentials {
                client_id,
                authentication,
            } => {
                let request = request.form_param(param::CLIENT_ID, client_id.as_str());
                let request = authenticate(request, client_id, authentication);
                request
                    .form_param(param::GRANT_TYPE, GRANT_TYPE_CLIENT_CREDENTIALS)
                    .form_param(param::SCOPE, self.scope.as_str())
            }
            Grant::TokenExchange {
                audience,
                subject_token,
            } => request
                .form_param(param::GRANT_TYPE, GRANT_TYPE_TOKEN_EXCHANGE)
                .form_param("audience", audience.as_str())
                .form_param("subject_token", subject_token.as_str())
                .form_param("subject_token_type", SUBJECT_TOKEN_TYPE_JWT)
                .form_param("requested_token_type", REQUESTED_TOKEN_TYPE_ACCESS_TOKEN)
                .form_param(param::SCOPE, self.scope.as_str()),
        }
    }
}

fn authenticate(
    request: HttpRequest,
    client_id: &str,
    authentication: &ClientAuthentication,
) -> HttpRequest {
    match authentication {
        ClientAuthentication::ClientSecretBasic { client_secret } => {
            let credentials = format!("{client_id}:{client_secret}");
            request.header(
                "Authorization",
                format!("Basic {}", Base64::encode_string(credentials.as_bytes())),
            )
        }
        ClientAuthentication::ClientSecretPost { client_secret } => {
            request.form_param(param::CLIENT_SECRET, client_secret.as_str())
        }
        ClientAuthentication::ClientAssertion { assertion } => request
            .form_param(param::CLIENT_ASSERTION_TYPE, CLIENT_ASSERTION_TYPE_JWT_BEARER)
            .form_param(param::CLIENT_ASSERTION, assertion.as_str()),
        ClientAuthentication::Pkcs7 {
            federated_credential_name,
            attested_document,
        } => request
            .form_param(
                param::APPLICATION_FEDERATED_CREDENTIAL_NAME,
                federated_credential_name.as_str(),
            )
            .form_param(param::CLIENT_ASSERTION_TYPE, CLIENT_ASSERTION_TYPE_PKCS7_BEARER)
            .form_param(param::CLIENT_ASSERTION, attested_document.as_str()),
        ClientAuthentication::Oidc {
            federated_credential_name,
            oidc_token,
        } => request
            .form_param(
                param::APPLICATION_FEDERATED_CREDENTIAL_NAME,
                federated_credential_name.as_str(),
            )
            .form_param(param::CLIENT_ASSERTION_TYPE, CLIENT_ASSERTION_TYPE_ID_TOKEN_BEARER)
            .form_param(param::CLIENT_ASSERTION, oidc_token.as_str()),
        ClientAuthentication::Pca {
            federated_credential_name,
            client_x509_certificate,
            x509_cert_chains,
            assertion,
        } => request
            .form_param(
                param::APPLICATION_FEDERATED_CREDENTIAL_NAME,
                federated_credential_name.as_str(),
            )
            .form_param(param::CLIENT_ASSERTION_TYPE, CLIENT_ASSERTION_TYPE_X509_JWT_BEARER)
            .form_param(param::CLIENT_ASSERTION, assertion.as_str())
            .form_param(param::CLIENT_X509, client_x509_certificate.as_str())
            .form_param(param::CLIENT_X509_CHAIN, x509_cert_chains.as_str()),
    }
}

/// Sends `request` and parses the token response.
///
/// # Errors
///
/// - [`HttpError::Transport`] if the endpoint could not be reached,
/// - [`HttpError::Client`] / [`HttpError::Server`] for non-2xx responses, with
///   the OAuth2 error code when the body carried one
///   (see [`HttpError::oauth2_error_code`]),
/// - [`HttpError::InvalidBody`] if a 2xx body is not a token response.
pub fn fetch_token(
    client: &dyn HttpClient,
    request: &TokenRequest,
    now: OffsetDateTime,
) -> Result<TokenResponse, HttpError> {
    let response = client.send(&request.to_http_request())?.error_for_status()?;
    TokenResponse::from_json(&response.body, now).map_err(HttpError::InvalidBody)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use parking_lot::Mutex;

    const ENDPOINT: &str = "https://idaas.example.com/api/v2/iauths_system/oauth2/token";

    fn request(authentication: ClientAuthentication) -> HttpRequest {
        TokenRequest::client_credentials(ENDPOINT, "app-1", "scope-a", authentication)
            .to_http_request()
    }

    fn form_names(request: &HttpRequest) -> Vec<&str> {
        request.form().iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn authn_method_names_round_trip() {
        for method in TokenAuthnMethod::ALL {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
            assert_eq!(method.as_str().parse::<TokenAuthnMethod>().unwrap(), method);
        }
        assert_eq!(
            "private_key_jwt".parse::<TokenAuthnMethod>().unwrap(),
            TokenAuthnMethod::PrivateKeyJwt
        );
        assert!("mtls".parse::<TokenAuthnMethod>().is_err());
    }

    #[test]
    fn client_secret_basic_uses_authorization_header() {
        let request = request(ClientAuthentication::ClientSecretBasic {
            client_secret: "s3cret".into(),
        });
        // base64("app-1:s3cret")
        assert_eq!(
            request.header_value("authorization"),
            Some("Basic YXBwLTE6czNjcmV0")
        );
        assert_eq!(form_names(&request), ["client_id", "grant_type", "scope"]);
        assert_eq!(request.form_value("grant_type"), Some("client_credentials"));
    }

    #[test]
    fn client_secret_post_puts_secret_in_form() {
        let request = request(ClientAuthentication::ClientSecretPost {
            client_secret: "s3cret".into(),
        });
        assert_eq!(request.header_value("authorization"), None);
        assert_eq!(request.form_value("client_secret"), Some("s3cret"));
        assert_eq!(request.url(), ENDPOINT);
    }

    #[test]
    fn federated_methods_use_their_assertion_types() {
        let pkcs7 = request(ClientAuthentication::Pkcs7 {
            federated_credential_name: "ecs".into(),
            attested_document: "MIIB".into(),
        });
        assert_eq!(
            pkcs7.form_value("client_assertion_type"),
            Some(CLIENT_ASSERTION_TYPE_PKCS7_BEARER)
        );
        assert_eq!(
            pkcs7.form_value("application_federated_credential_name"),
            Some("ecs")
        );

        let oidc = request(ClientAuthentication::Oidc {
            federated_credential_name: "k8s".into(),
            oidc_token: "eyJ".into(),
        });
        assert_eq!(
            oidc.form_value("client_assertion_type"),
            Some(CLIENT_ASSERTION_TYPE_ID_TOKEN_BEARER)
        );
        assert_eq!(oidc.form_value("client_assertion"), Some("eyJ"));

        let pca = request(ClientAuthentication::Pca {
            federated_credential_name: "pca".into(),
            client_x509_certificate: "CERT".into(),
            x509_cert_chains: "CHAIN".into(),
            assertion: "eyJ".into(),
        });
        assert_eq!(
            pca.form_value("client_assertion_type"),
            Some(CLIENT_ASSERTION_TYPE_X509_JWT_BEARER)
        );
        assert_eq!(pca.form_value("client_x509"), Some("CERT"));
        assert_eq!(pca.form_value("client_x509_chain"), Some("CHAIN"));
    }

    #[test]
    fn token_exchange_form() {
        let request =
            TokenRequest::token_exchange(ENDPOINT, "aud-1", "subject", "scope-a").to_http_request();
        assert_eq!(request.form_value("grant_type"), Some(GRANT_TYPE_TOKEN_EXCHANGE));
        assert_eq!(request.form_value("audience"), Some("aud-1"));
        assert_eq!(request.form_value("client_id"), None);
    }

    struct Canned {
        response: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for Canned {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().push(request.clone());
            Ok(self.response.clone())
        }
    }

    #[test]
    fn fetch_token_parses_success() {
        let client = Canned {
            response: HttpResponse::new(200, r#"{"access_token":"at","expires_in":600}"#),
            seen: Mutex::new(Vec::new()),
        };
        let now = OffsetDateTime::from_unix_timestamp(100).unwrap();
        let request = TokenRequest::client_credentials(
            ENDPOINT,
            "app-1",
            "scope-a",
            ClientAuthentication::ClientAssertion {
                assertion: "jwt".into(),
            },
        );
        let token = fetch_token(&client, &request, now).unwrap();
        assert_eq!(token.expires_at(), 700);
        assert_eq!(client.seen.lock().len(), 1);
    }

    #[test]
    fn fetch_token_maps_oauth2_errors() {
        let client = Canned {
            response: HttpResponse::new(400, r#"{"error":"slow_down"}"#),
            seen: Mutex::new(Vec::new()),
        };
        let request = TokenRequest::token_exchange(ENDPOINT, "a", "s", "scope");
        let err = fetch_token(&client, &request, OffsetDateTime::UNIX_EPOCH).unwrap_err();
        assert_eq!(err.oauth2_error_code(), Some(ERROR_SLOW_DOWN));
    }
}
