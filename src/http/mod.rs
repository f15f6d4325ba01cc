//! Minimal blocking HTTP abstraction used to reach token and metadata endpoints.
//!
//! The crate only needs form posts and simple `GET`/`PUT` calls, so requests and
//! responses are plain owned values. Plug in any client by implementing
//! [`HttpClient`]; a `reqwest`-backed implementation is available behind the
//! `http-reqwest` feature.

#[cfg(feature = "http-reqwest")]
mod reqwest;

#[cfg(feature = "http-reqwest")]
pub use self::reqwest::ReqwestHttpClient;

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::form_urlencoded;

/// Default connect timeout for outgoing requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for outgoing requests.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP method of an [`HttpRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
///
/// A non-empty `form` is sent as an `application/x-www-form-urlencoded` body.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

// Header and form values carry secrets; only names are printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        let form: Vec<&str> = self.form.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("form", &form)
            .finish()
    }
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Shorthand for a `POST` request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Shorthand for a `PUT` request.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a form parameter.
    #[must_use]
    pub fn form_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    /// Request method.
    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers, in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Form parameters, in insertion order.
    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    /// First form parameter named `name`.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Form parameters encoded as a URL-encoded body.
    pub fn encoded_form(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form.iter())
            .finish()
    }
}

/// A received response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body decoded as UTF-8 (lossily).
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Turns a non-2xx response into an [`HttpError`], parsing an OAuth2
    /// error body when present.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Client`] for 4xx and [`HttpError::Server`] for any
    /// other non-2xx status.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = ErrorDetail::from_body(&self.body);
        if (400..500).contains(&self.status) {
            Err(HttpError::Client {
                status: self.status,
                detail,
            })
        } else {
            Err(HttpError::Server {
                status: self.status,
                detail,
            })
        }
    }
}

/// Error code and message reported by a remote endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    /// OAuth2 `error` code, if the body carried one.
    pub code: Option<String>,
    /// Human-readable description, or the raw body.
    pub message: String,
    /// Server-side request id, if any.
    pub request_id: Option<String>,
}

#[derive(Deserialize)]
struct OAuth2ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    request_id: Option<String>,
}

impl ErrorDetail {
    fn from_body(body: &str) -> Self {
        match serde_json::from_str::<OAuth2ErrorBody>(body) {
            Ok(parsed) if parsed.error.is_some() => Self {
                message: parsed.error_description.unwrap_or_default(),
                code: parsed.error,
                request_id: parsed.request_id,
            },
            _ => Self {
                code: None,
                message: body.to_owned(),
                request_id: None,
            },
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request id: {request_id})")?;
        }
        Ok(())
    }
}

/// Errors produced while talking to a remote endpoint.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request could not be sent or the response could not be read.
    #[error("http transport error: {0}")]
    Transport(String),

    /// The endpoint rejected the request (4xx).
    #[error("client error {status}: {detail}")]
    Client {
        /// Status code.
        status: u16,
        /// Parsed error body.
        detail: ErrorDetail,
    },

    /// The endpoint failed (5xx or unexpected status).
    #[error("server error {status}: {detail}")]
    Server {
        /// Status code.
        status: u16,
        /// Parsed error body.
        detail: ErrorDetail,
    },

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    InvalidBody(#[source] serde_json::Error),
}

impl HttpError {
    /// OAuth2 error code carried by a rejected request, if any.
    pub fn oauth2_error_code(&self) -> Option<&str> {
        match self {
            Self::Client { detail, .. } | Self::Server { detail, .. } => detail.code.as_deref(),
            _ => None,
        }
    }
}

/// Blocking HTTP client.
///
/// Implementations must be shareable across threads: refreshes may run on the
/// calling thread or on a background worker.
pub trait HttpClient: Send + Sync {
    /// Sends `request` and returns the raw response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Transport`] if no response was received.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn form_is_url_encoded_in_order() {
        let request = HttpRequest::post("https://example.com/token")
            .form_param("scope", "a|b c")
            .form_param("client_id", "app");
        assert_eq!(request.encoded_form(), "scope=a%7Cb+c&client_id=app");
        assert_eq!(request.form_value("client_id"), Some("app"));
    }

    #[test]
    fn debug_hides_values() {
        let request = HttpRequest::post("https://example.com/token")
            .header("Authorization", "Basic c2VjcmV0")
            .form_param("client_secret", "hunter2");
        let printed = format!("{request:?}");
        assert!(printed.contains("client_secret"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("c2VjcmV0"));
    }

    #[test]
    fn oauth2_error_body_is_parsed() {
        let response = HttpResponse::new(
            400,
            r#"{"error":"invalid_client","error_description":"bad secret","request_id":"r-1"}"#,
        );
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.oauth2_error_code(), Some("invalid_client"));
        assert_eq!(
            err.to_string(),
            "client error 400: invalid_client: bad secret (request id: r-1)"
        );
    }

    #[test]
    fn non_json_error_keeps_raw_body() {
        let err = HttpResponse::new(502, "bad gateway")
            .error_for_status()
            .unwrap_err();
        assert!(matches!(err, HttpError::Server { status: 502, .. }));
        assert_eq!(err.oauth2_error_code(), None);
        assert_eq!(err.to_string(), "server error 502: bad gateway");
    }

    #[test]
    fn success_passes_through() {
        let response = HttpResponse::new(204, "").error_for_status().unwrap();
        assert_eq!(response.status, 204);
    }
}
