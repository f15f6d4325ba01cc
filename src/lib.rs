#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Machine identity credentials for workloads talking to an IDaaS
//! (identity-as-a-service) tenant.
//!
//! The crate obtains OAuth2 access tokens with the `client_credentials` grant
//! and keeps them fresh in memory. Clients authenticate with a shared secret,
//! a signed JWT assertion, a cloud-platform attested document, a federated
//! OIDC token or a private-CA certificate.
//!
//! At its core is [`CachedResultSupplier`], a self-refreshing single-value
//! cache. Every cached value carries a *stale* instant (it must be refreshed
//! before being served) and a *prefetch* instant (an early refresh should be
//! attempted). Concurrent callers share one refresh; how prefetches run is
//! chosen with a [`PrefetchStrategy`].
//!
//! ## From a configuration file
//!
//! ```no_run
//! use idaas_credential::{CredentialProvider, CredentialProviderFactory};
//!
//! // Reads CLOUD_IDAAS_CONFIG_PATH or ~/.cloud_idaas/client-config.json
//! let factory = CredentialProviderFactory::load(None)?;
//! let provider = factory.provider()?;
//!
//! let bearer = provider.bearer_token()?;
//! # Ok::<(), idaas_credential::CredentialError>(())
//! ```
//!
//! ## Caching any value
//!
//! ```
//! use idaas_credential::{CachedResultSupplier, NonBlockingPrefetchStrategy, RefreshResult};
//! use time::{Duration, OffsetDateTime};
//!
//! let supplier = CachedResultSupplier::builder(|| {
//!     let now = OffsetDateTime::now_utc();
//!     Ok::<_, std::io::Error>(
//!         RefreshResult::builder(42)
//!             .stale_time(now + Duration::hours(1))
//!             .prefetch_time(now + Duration::minutes(45))
//!             .build(),
//!     )
//! })
//! .prefetch_strategy(NonBlockingPrefetchStrategy::default())
//! .build();
//!
//! assert_eq!(supplier.get()?, 42);
//! # Ok::<(), idaas_credential::CacheError>(())
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): emit `log` records
//! - **`tracing`**: emit `tracing` events instead
//! - **`http-reqwest`** (default): blocking `reqwest` HTTP client

mod observability;
mod prelude;

pub mod assertion;
pub mod attestation;
pub mod cache;
pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod factory;
pub mod http;
pub mod oauth2;
pub mod oidc;
pub mod provider;

// -----------------------
// Re-exports
// -----------------------

pub use crate::cache::{
    BoxError, CacheConfig, CacheError, CachedResultSupplier, CachedResultSupplierBuilder, Jitter,
    NonBlockingPrefetchStrategy, OneCallerBlocksPrefetchStrategy, PrefetchStrategy,
    RefreshExecutor, RefreshResult, RefreshResultBuilder, StaleValueBehavior,
};

pub use crate::{
    assertion::{ClientAssertionProvider, ClientSecretAssertionProvider, PrivateKeyAssertionProvider},
    attestation::{AlibabaCloudEcsAttestedDocumentProvider, AttestedDocumentProvider},
    config::{ClientConfig, ConfigError},
    credential::{Credential, TokenResponse},
    error::CredentialError,
    factory::CredentialProviderFactory,
    http::{HttpClient, HttpError, HttpRequest, HttpResponse},
    oauth2::TokenAuthnMethod,
    oidc::{FileOidcTokenProvider, OidcTokenProvider},
    provider::{
        CredentialProvider, MachineCredentialProvider, RefreshOptions,
        RefreshedCredentialProvider,
    },
};

#[cfg(feature = "http-reqwest")]
pub use crate::http::ReqwestHttpClient;
