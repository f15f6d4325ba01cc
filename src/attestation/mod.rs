//! Platform attested documents (PKCS#7) proving where the workload runs.

mod alibaba_ecs;

pub use alibaba_ecs::{
    AlibabaCloudEcsAttestedDocumentProvider, AlibabaCloudEcsAttestedDocumentProviderBuilder,
    DEFAULT_DOCUMENT_EFFECTIVE_SECS, ECS_METADATA_TOKEN_URL, ECS_PKCS7_DOCUMENT_URL,
};

use crate::cache::CacheError;
use crate::http::HttpError;
use parking_lot::RwLock;
use std::fmt::Debug;
use thiserror::Error;

/// Errors produced by an [`AttestedDocumentProvider`].
#[derive(Debug, Error)]
pub enum AttestationError {
    /// No document has been configured.
    #[error("attested document is not set")]
    Missing,

    /// The provider cannot produce documents on this platform.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The provider was built with invalid settings.
    #[error("invalid attestation configuration: {0}")]
    InvalidConfig(String),

    /// The metadata service could not be reached or refused the request.
    #[error("metadata service request failed")]
    Http(#[from] HttpError),

    /// The cached document could not be refreshed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Supplies a PKCS#7 attested document for the PKCS7 authentication method.
pub trait AttestedDocumentProvider: Send + Sync {
    /// Returns a currently valid attested document.
    ///
    /// # Errors
    ///
    /// Returns an [`AttestationError`] if no document can be obtained.
    fn attested_document(&self) -> Result<String, AttestationError>;
}

/// Serves a document set in code.
#[derive(Default)]
pub struct StaticAttestedDocumentProvider {
    document: RwLock<Option<String>>,
}

impl Debug for StaticAttestedDocumentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAttestedDocumentProvider")
            .field("document", &self.document.read().as_ref().map(String::len))
            .finish()
    }
}

impl StaticAttestedDocumentProvider {
    /// Creates a provider serving `document`.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: RwLock::new(Some(document.into())),
        }
    }

    /// Replaces the served document.
    pub fn set_document(&self, document: impl Into<String>) {
        *self.document.write() = Some(document.into());
    }
}

impl AttestedDocumentProvider for StaticAttestedDocumentProvider {
    fn attested_document(&self) -> Result<String, AttestationError> {
        self.document
            .read()
            .as_ref()
            .filter(|d| !d.trim().is_empty())
            .cloned()
            .ok_or(AttestationError::Missing)
    }
}

/// Placeholder for AWS EC2 instance identity documents. Always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct AwsEc2AttestedDocumentProvider;

impl AttestedDocumentProvider for AwsEc2AttestedDocumentProvider {
    fn attested_document(&self) -> Result<String, AttestationError> {
        Err(AttestationError::Unsupported("AWS EC2 PKCS7 attested document"))
    }
}
