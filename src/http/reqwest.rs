use super::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};
use crate::config::HttpConfiguration;
use crate::prelude::warn;
use ::reqwest::blocking::Client;
use ::reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// [`HttpClient`] backed by a blocking `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Builds a client with the given connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Builds a client from the configured timeouts and TLS setting.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Transport`] if the TLS backend cannot be initialized.
    pub fn from_config(config: &HttpConfiguration) -> Result<Self, HttpError> {
        if config.unsafe_ignore_ssl_cert {
            warn!("tls certificate verification is disabled for idaas requests");
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout_duration())
            .timeout(config.read_timeout_duration())
            .danger_accept_invalid_certs(config.unsafe_ignore_ssl_cert)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.method() {
            HttpMethod::Get => self.client.get(request.url()),
            HttpMethod::Post => self.client.post(request.url()),
            HttpMethod::Put => self.client.put(request.url()),
        };
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.form().is_empty() {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(request.encoded_form());
        }

        let response = builder
            .send()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}
