//! Immutable snapshot produced by a successful refresh.

use time::OffsetDateTime;

/// A value together with the instants at which it becomes stale and at which a
/// background refresh should be attempted.
///
/// Either instant may be absent:
/// - no `stale_time` means the value never becomes stale,
/// - no `prefetch_time` means no background refresh is ever scheduled.
///
/// `prefetch_time <= stale_time` is expected but not enforced. A snapshot is
/// never mutated after construction; the cache replaces it wholesale.
///
/// # Examples
///
/// ```
/// use idaas_credential::RefreshResult;
/// use time::{Duration, OffsetDateTime};
///
/// let now = OffsetDateTime::now_utc();
/// let result = RefreshResult::builder("token")
///     .stale_time(now + Duration::minutes(10))
///     .prefetch_time(now + Duration::minutes(5))
///     .build();
///
/// assert_eq!(*result.value(), "token");
/// assert!(result.prefetch_time() < result.stale_time());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefreshResult<T> {
    value: T,
    stale_time: Option<OffsetDateTime>,
    prefetch_time: Option<OffsetDateTime>,
}

impl<T> RefreshResult<T> {
    /// Creates a snapshot from its three parts.
    pub const fn new(
        value: T,
        stale_time: Option<OffsetDateTime>,
        prefetch_time: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            value,
            stale_time,
            prefetch_time,
        }
    }

    /// Starts a builder for a snapshot holding `value`, with both instants unset.
    pub const fn builder(value: T) -> RefreshResultBuilder<T> {
        RefreshResultBuilder {
            value,
            stale_time: None,
            prefetch_time: None,
        }
    }

    /// Returns the cached value.
    pub const fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the snapshot and returns the cached value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Instant after which the value must not be served without attempting a refresh.
    pub const fn stale_time(&self) -> Option<OffsetDateTime> {
        self.stale_time
    }

    /// Instant after which a background refresh should be attempted.
    pub const fn prefetch_time(&self) -> Option<OffsetDateTime> {
        self.prefetch_time
    }

    /// Returns `true` if the snapshot is stale at `now`.
    pub(crate) fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        self.stale_time.is_some_and(|stale| now > stale)
    }

    /// Returns `true` if a prefetch is due at `now`.
    pub(crate) fn is_prefetch_due_at(&self, now: OffsetDateTime) -> bool {
        self.prefetch_time.is_some_and(|prefetch| now > prefetch)
    }

    /// Returns a copy with both instants passed through `f`.
    pub(crate) fn map_times<F>(self, mut f: F) -> Self
    where
        F: FnMut(OffsetDateTime) -> OffsetDateTime,
    {
        Self {
            value: self.value,
            stale_time: self.stale_time.map(&mut f),
            prefetch_time: self.prefetch_time.map(&mut f),
        }
    }
}

/// Builder for [`RefreshResult`].
#[derive(Clone, Debug)]
pub struct RefreshResultBuilder<T> {
    value: T,
    stale_time: Option<OffsetDateTime>,
    prefetch_time: Option<OffsetDateTime>,
}

impl<T> RefreshResultBuilder<T> {
    /// Sets the stale instant.
    #[must_use]
    pub fn stale_time(mut self, stale_time: OffsetDateTime) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Sets the prefetch instant.
    #[must_use]
    pub fn prefetch_time(mut self, prefetch_time: OffsetDateTime) -> Self {
        self.prefetch_time = Some(prefetch_time);
        self
    }

    /// Builds the snapshot. No ordering validation is performed.
    pub fn build(self) -> RefreshResult<T> {
        RefreshResult {
            value: self.value,
            stale_time: self.stale_time,
            prefetch_time: self.prefetch_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn builder_leaves_unset_instants_absent() {
        let result = RefreshResult::builder(7).build();
        assert_eq!(result.stale_time(), None);
        assert_eq!(result.prefetch_time(), None);
        assert!(!result.is_stale_at(at(i64::from(u32::MAX))));
        assert!(!result.is_prefetch_due_at(at(i64::from(u32::MAX))));
    }

    #[test]
    fn equality_is_structural() {
        let a = RefreshResult::builder("v").stale_time(at(10)).build();
        let b = RefreshResult::new("v", Some(at(10)), None);
        let c = RefreshResult::builder("v").stale_time(at(11)).build();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn no_ordering_validation() {
        let result = RefreshResult::builder(())
            .stale_time(at(5))
            .prefetch_time(at(10))
            .build();
        assert!(result.prefetch_time() > result.stale_time());
    }

    #[test]
    fn staleness_is_strictly_after() {
        let result = RefreshResult::builder(()).stale_time(at(10)).prefetch_time(at(5)).build();
        assert!(!result.is_stale_at(at(10)));
        assert!(result.is_stale_at(at(11)));
        assert!(!result.is_prefetch_due_at(at(5)));
        assert!(result.is_prefetch_due_at(at(6)));
    }

    #[test]
    fn map_times_touches_only_present_instants() {
        let result = RefreshResult::builder(1)
            .stale_time(at(10))
            .build()
            .map_times(|t| t + Duration::seconds(1));
        assert_eq!(result.stale_time(), Some(at(11)));
        assert_eq!(result.prefetch_time(), None);
        assert_eq!(result.into_value(), 1);
    }
}
