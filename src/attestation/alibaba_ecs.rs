use super::{AttestationError, AttestedDocumentProvider};
use crate::cache::{Clock, RefreshExecutor, RefreshResult, StaleValueBehavior};
use crate::http::{HttpClient, HttpError, HttpRequest};
use crate::prelude::debug;
use crate::provider::{RefreshOptions, RefreshedCredentialProvider};
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Instance metadata endpoint issuing session tokens.
pub const ECS_METADATA_TOKEN_URL: &str = "http://100.100.100.200/latest/api/token";

/// Instance metadata endpoint issuing PKCS#7 identity documents.
pub const ECS_PKCS7_DOCUMENT_URL: &str =
    "http://100.100.100.200/latest/dynamic/instance-identity/pkcs7";

/// Default document lifetime, in seconds.
pub const DEFAULT_DOCUMENT_EFFECTIVE_SECS: i64 = 3_600;

const MIN_DOCUMENT_EFFECTIVE_SECS: i64 = 1_200;
const MAX_DOCUMENT_EFFECTIVE_SECS: i64 = 1_314_000;

const TOKEN_TTL_HEADER: &str = "X-aliyun-ecs-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aliyun-ecs-metadata-token";

#[derive(Serialize)]
struct Audience<'a> {
    aud: &'a str,
    #[serde(rename = "signingTime")]
    signing_time: i64,
}

struct DocumentSource {
    http: Arc<dyn HttpClient>,
    instance_id: String,
    token_url: String,
    document_url: String,
    effective_secs: i64,
}

impl DocumentSource {
    fn fetch(&self, now: OffsetDateTime) -> Result<RefreshResult<String>, AttestationError> {
        let token_request = HttpRequest::put(self.token_url.as_str())
            .header(TOKEN_TTL_HEADER, self.effective_secs.to_string());
        let metadata_token = self.http.send(&token_request)?.error_for_status()?.body;

        let signing_time = now.unix_timestamp();
        let audience = serde_json::to_string(&Audience {
            aud: &self.instance_id,
            signing_time,
        })
        .map_err(HttpError::InvalidBody)?;
        let encoded: String = url::form_urlencoded::byte_serialize(audience.as_bytes()).collect();

        let document_request =
            HttpRequest::get(format!("{}?audience={encoded}", self.document_url))
                .header(TOKEN_HEADER, metadata_token.trim());
        let document = self
            .http
            .send(&document_request)?
            .error_for_status()?
            .body
            .trim()
            .to_owned();
        if document.is_empty() {
            return Err(AttestationError::Missing);
        }
        debug!("fetched ecs attested document for instance {}", self.instance_id);

        Ok(RefreshResult::builder(document)
            .stale_time(now + Duration::seconds(self.effective_secs))
            .prefetch_time(now + Duration::seconds(self.effective_secs / 2))
            .build())
    }
}

/// Fetches PKCS#7 identity documents from the Alibaba Cloud ECS instance
/// metadata service.
///
/// Documents are signed for `aud = <IDaaS instance id>` and cached. They turn
/// stale after the configured lifetime and are prefetched at half of it.
pub struct AlibabaCloudEcsAttestedDocumentProvider {
    instance_id: String,
    effective_secs: i64,
    cache: RefreshedCredentialProvider<String>,
}

impl Debug for AlibabaCloudEcsAttestedDocumentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlibabaCloudEcsAttestedDocumentProvider")
            .field("instance_id", &self.instance_id)
            .field("effective_secs", &self.effective_secs)
            .field(
                "async_credential_update_enabled",
                &self.cache.is_async_credential_update_enabled(),
            )
            .finish()
    }
}

impl AlibabaCloudEcsAttestedDocumentProvider {
    /// Starts a builder for documents addressed to `idaas_instance_id`.
    pub fn builder(
        idaas_instance_id: impl Into<String>,
        http: Arc<dyn HttpClient>,
    ) -> AlibabaCloudEcsAttestedDocumentProviderBuilder {
        AlibabaCloudEcsAttestedDocumentProviderBuilder {
            instance_id: idaas_instance_id.into(),
            http,
            token_url: ECS_METADATA_TOKEN_URL.to_owned(),
            document_url: ECS_PKCS7_DOCUMENT_URL.to_owned(),
            effective_secs: DEFAULT_DOCUMENT_EFFECTIVE_SECS,
            options: RefreshOptions::default(),
            clock: None,
        }
    }

    /// Document lifetime in seconds.
    pub const fn effective_secs(&self) -> i64 {
        self.effective_secs
    }

    /// Releases the prefetch strategy. Idempotent.
    pub fn close(&self) {
        self.cache.close();
    }
}

impl AttestedDocumentProvider for AlibabaCloudEcsAttestedDocumentProvider {
    fn attested_document(&self) -> Result<String, AttestationError> {
        Ok(self.cache.get()?)
    }
}

/// Builder for [`AlibabaCloudEcsAttestedDocumentProvider`].
pub struct AlibabaCloudEcsAttestedDocumentProviderBuilder {
    instance_id: String,
    http: Arc<dyn HttpClient>,
    token_url: String,
    document_url: String,
    effective_secs: i64,
    options: RefreshOptions,
    clock: Option<Clock>,
}

impl Debug for AlibabaCloudEcsAttestedDocumentProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlibabaCloudEcsAttestedDocumentProviderBuilder")
            .field("instance_id", &self.instance_id)
            .field("http", &"<HttpClient>")
            .field("token_url", &self.token_url)
            .field("document_url", &self.document_url)
            .field("effective_secs", &self.effective_secs)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AlibabaCloudEcsAttestedDocumentProviderBuilder {
    /// Overrides the metadata token endpoint.
    #[must_use]
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Overrides the PKCS#7 document endpoint. The `audience` query is appended.
    #[must_use]
    pub fn document_url(mut self, url: impl Into<String>) -> Self {
        self.document_url = url.into();
        self
    }

    /// Document lifetime, in seconds. Must lie in `(1200, 1314000]`.
    #[must_use]
    pub fn effective_secs(mut self, secs: i64) -> Self {
        self.effective_secs = secs;
        self
    }

    /// Refresh documents in the background.
    #[must_use]
    pub fn async_credential_update_enabled(mut self, enabled: bool) -> Self {
        self.options.async_credential_update_enabled = enabled;
        self
    }

    /// Policy when a stale document cannot be refreshed. Defaults to strict.
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

    /// Validates the settings and builds the provider. Nothing is fetched yet.
    ///
    /// # Errors
    ///
    /// Returns [`AttestationError::InvalidConfig`] for a blank instance id or
    /// endpoint, or an out-of-range lifetime.
    pub fn build(self) -> Result<AlibabaCloudEcsAttestedDocumentProvider, AttestationError> {
        if self.instance_id.trim().is_empty() {
            return Err(AttestationError::InvalidConfig(
                "idaas instance id must not be blank".to_owned(),
            ));
        }
        if self.token_url.trim().is_empty() || self.document_url.trim().is_empty() {
            return Err(AttestationError::InvalidConfig(
                "metadata service urls must not be blank".to_owned(),
            ));
        }
        if self.effective_secs <= MIN_DOCUMENT_EFFECTIVE_SECS
            || self.effective_secs > MAX_DOCUMENT_EFFECTIVE_SECS
        {
            return Err(AttestationError::InvalidConfig(format!(
                "document lifetime must be greater than {MIN_DOCUMENT_EFFECTIVE_SECS} and at most {MAX_DOCUMENT_EFFECTIVE_SECS} seconds, got {}",
                self.effective_secs
            )));
        }

        let source = DocumentSource {
            http: self.http,
            instance_id: self.instance_id.clone(),
            token_url: self.token_url,
            document_url: self.document_url,
            effective_secs: self.effective_secs,
        };
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(OffsetDateTime::now_utc),
        };
        let producer_clock = Arc::clone(&clock);
        let cache = RefreshedCredentialProvider::with_clock(
            move || source.fetch(producer_clock()),
            self.options,
            move || clock(),
        );

        Ok(AlibabaCloudEcsAttestedDocumentProvider {
            instance_id: self.instance_id,
            effective_secs: self.effective_secs,
            cache,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use crate::http::{HttpMethod, HttpResponse};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MetadataServer {
        requests: Mutex<Vec<HttpRequest>>,
        fail_documents: Mutex<bool>,
    }

    impl HttpClient for MetadataServer {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            self.requests.lock().push(request.clone());
            match request.method() {
                HttpMethod::Put => Ok(HttpResponse::new(200, "md-token\n")),
                _ if *self.fail_documents.lock() => Ok(HttpResponse::new(503, "unavailable")),
                _ => {
                    let n = self.requests.lock().len();
                    Ok(HttpResponse::new(200, format!("MIIdocument{n}")))
                }
            }
        }
    }

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    fn provider(
        server: &Arc<MetadataServer>,
        now: &Arc<Mutex<OffsetDateTime>>,
    ) -> AlibabaCloudEcsAttestedDocumentProvider {
        let now = Arc::clone(now);
        AlibabaCloudEcsAttestedDocumentProvider::builder("idaas-123", server.clone())
            .refresh_options(RefreshOptions {
                cache: crate::cache::CacheConfig {
                    jitter: crate::cache::Jitter::none(),
                    ..RefreshOptions::default().cache
                },
                ..RefreshOptions::default()
            })
            .clock(move || *now.lock())
            .build()
            .unwrap()
    }

    #[test]
    fn fetches_token_then_document() {
        let server = Arc::new(MetadataServer::default());
        let now = Arc::new(Mutex::new(at(1_700_000_000)));
        let provider = provider(&server, &now);

        assert_eq!(provider.attested_document().unwrap(), "MIIdocument2");

        let requests = server.requests.lock();
        assert_eq!(requests[0].method(), HttpMethod::Put);
        assert_eq!(requests[0].url(), ECS_METADATA_TOKEN_URL);
        assert_eq!(requests[0].header_value(TOKEN_TTL_HEADER), Some("3600"));

        assert_eq!(requests[1].method(), HttpMethod::Get);
        assert_eq!(requests[1].header_value(TOKEN_HEADER), Some("md-token"));
        let expected_audience = "%7B%22aud%22%3A%22idaas-123%22%2C%22signingTime%22%3A1700000000%7D";
        assert_eq!(
            requests[1].url(),
            format!("{ECS_PKCS7_DOCUMENT_URL}?audience={expected_audience}")
        );
    }

    #[test]
    fn document_is_cached_until_half_its_lifetime() {
        let server = Arc::new(MetadataServer::default());
        let now = Arc::new(Mutex::new(at(1_000_000)));
        let provider = provider(&server, &now);

        let first = provider.attested_document().unwrap();
        *now.lock() = at(1_000_000 + 1_800);
        assert_eq!(provider.attested_document().unwrap(), first);
        assert_eq!(server.requests.lock().len(), 2);

        *now.lock() = at(1_000_000 + 1_801);
        assert_ne!(provider.attested_document().unwrap(), first);
        assert_eq!(server.requests.lock().len(), 4);
    }

    #[test]
    fn strict_failure_is_reported() {
        let server = Arc::new(MetadataServer::default());
        *server.fail_documents.lock() = true;
        let now = Arc::new(Mutex::new(at(0)));
        let provider = provider(&server, &now);
        assert!(matches!(
            provider.attested_document(),
            Err(AttestationError::Cache(CacheError::Refresh(_)))
        ));
    }

    #[test]
    fn lifetime_bounds_are_enforced() {
        let http: Arc<dyn HttpClient> = Arc::new(MetadataServer::default());
        for secs in [1_200, 1_314_001, 0] {
            let result = AlibabaCloudEcsAttestedDocumentProvider::builder("idaas-123", http.clone())
                .effective_secs(secs)
                .build();
            assert!(matches!(result, Err(AttestationError::InvalidConfig(_))));
        }
        let provider = AlibabaCloudEcsAttestedDocumentProvider::builder("idaas-123", http.clone())
            .effective_secs(1_314_000)
            .build()
            .unwrap();
        assert_eq!(provider.effective_secs(), 1_314_000);
        assert!(matches!(
            AlibabaCloudEcsAttestedDocumentProvider::builder(" ", http).build(),
            Err(AttestationError::InvalidConfig(_))
        ));
    }
}
