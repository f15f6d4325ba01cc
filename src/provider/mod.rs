//! Credential providers built on top of [`CachedResultSupplier`].

mod machine;

pub use machine::{MachineCredentialProvider, MachineCredentialProviderBuilder};

use crate::cache::{
    BoxError, CacheConfig, CacheError, CachedResultSupplier, NonBlockingPrefetchStrategy,
    OneCallerBlocksPrefetchStrategy, RefreshExecutor, RefreshResult, StaleValueBehavior,
};
use crate::credential::{Credential, TokenResponse};
use crate::error::CredentialError;
use std::fmt::Debug;
use time::OffsetDateTime;

/// Options shared by every refreshing provider.
#[derive(Clone, Debug)]
pub struct RefreshOptions {
    /// Refresh in the background once a credential is due for prefetch,
    /// instead of on the calling thread.
    pub async_credential_update_enabled: bool,
    /// Executor used for background refreshes. Defaults to
    /// [`RefreshExecutor::shared`].
    pub executor: Option<RefreshExecutor>,
    /// Cache tunables. The stale-value policy defaults to
    /// [`StaleValueBehavior::Strict`] for credentials.
    pub cache: CacheConfig,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            async_credential_update_enabled: false,
            executor: None,
            cache: CacheConfig {
                stale_value_behavior: StaleValueBehavior::Strict,
                ..CacheConfig::default()
            },
        }
    }
}

/// A credential kept fresh by a [`CachedResultSupplier`].
///
/// Chooses [`NonBlockingPrefetchStrategy`] when asynchronous updates are
/// enabled and [`OneCallerBlocksPrefetchStrategy`] otherwise.
pub struct RefreshedCredentialProvider<T> {
    supplier: CachedResultSupplier<T>,
    async_credential_update_enabled: bool,
}

impl<T: Debug> Debug for RefreshedCredentialProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedCredentialProvider")
            .field("supplier", &self.supplier)
            .field(
                "async_credential_update_enabled",
                &self.async_credential_update_enabled,
            )
            .finish()
    }
}

impl<T> RefreshedCredentialProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wraps `refresh` with the wall clock.
    pub fn new<F, E>(refresh: F, options: RefreshOptions) -> Self
    where
        F: Fn() -> Result<RefreshResult<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::with_clock(refresh, options, OffsetDateTime::now_utc)
    }

    /// Wraps `refresh`, reading the current instant from `clock`.
    pub fn with_clock<F, E, C>(refresh: F, options: RefreshOptions, clock: C) -> Self
    where
        F: Fn() -> Result<RefreshResult<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        C: Fn() -> OffsetDateTime + Send + Sync + 'static,
    {
        let builder = CachedResultSupplier::builder(refresh)
            .config(options.cache)
            .clock(clock);
        let supplier = if options.async_credential_update_enabled {
            let executor = options.executor.unwrap_or_else(RefreshExecutor::shared);
            builder
                .prefetch_strategy(NonBlockingPrefetchStrategy::new(executor))
                .build()
        } else {
            builder
                .prefetch_strategy(OneCallerBlocksPrefetchStrategy::new())
                .build()
        };
        Self {
            supplier,
            async_credential_update_enabled: options.async_credential_update_enabled,
        }
    }

    /// Returns the current credential, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// See [`CachedResultSupplier::get`].
    pub fn get(&self) -> Result<T, CacheError> {
        self.supplier.get()
    }

    /// Whether refreshes run in the background.
    pub const fn is_async_credential_update_enabled(&self) -> bool {
        self.async_credential_update_enabled
    }

    /// The underlying cache.
    pub fn cached_result_supplier(&self) -> &CachedResultSupplier<T> {
        &self.supplier
    }

    /// Releases the prefetch strategy. Idempotent.
    pub fn close(&self) {
        self.supplier.close();
    }
}

/// Source of OAuth2 credentials for the calling workload.
pub trait CredentialProvider: Send + Sync {
    /// Returns a valid credential.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if no valid credential can be obtained.
    fn credential(&self) -> Result<TokenResponse, CredentialError>;

    /// Returns the access token of [`CredentialProvider::credential`].
    ///
    /// # Errors
    ///
    /// Same as [`CredentialProvider::credential`].
    fn bearer_token(&self) -> Result<String, CredentialError> {
        Ok(self.credential()?.access_token().to_owned())
    }

    /// Returns the token to present where an OIDC token is expected; the
    /// access token.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialProvider::credential`].
    fn oidc_token(&self) -> Result<String, CredentialError> {
        self.bearer_token()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn credentials_default_to_strict() {
        let options = RefreshOptions::default();
        assert_eq!(
            options.cache.stale_value_behavior,
            StaleValueBehavior::Strict
        );
        assert!(!options.async_credential_update_enabled);
    }

    #[test]
    fn strategy_follows_async_flag() {
        let executor = RefreshExecutor::new(2);
        let provider = RefreshedCredentialProvider::new(
            || Ok::<_, io::Error>(RefreshResult::builder(1u8).build()),
            RefreshOptions {
                async_credential_update_enabled: true,
                executor: Some(executor.clone()),
                ..RefreshOptions::default()
            },
        );
        assert!(provider.is_async_credential_update_enabled());
        assert_eq!(provider.get().unwrap(), 1);
        provider.close();
        provider.close();
        executor.shutdown();
    }

    #[test]
    fn strict_provider_surfaces_failures() {
        let provider = RefreshedCredentialProvider::new(
            || Err::<RefreshResult<u8>, _>(io::Error::other("down")),
            RefreshOptions::default(),
        );
        assert!(matches!(provider.get(), Err(CacheError::Refresh(_))));
    }
}
