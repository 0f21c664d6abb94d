//! Observable resource states.
//!
//! [`Resource`] is the value delivered to cache observers. Every refresh
//! walks `Loading -> Success` or `Loading -> Error`; all three states carry
//! the last known value so callers can keep rendering data while a refresh
//! is in flight or after it failed.

use std::sync::Arc;

/// A value as observed through a cache subscription.
#[derive(Debug, Clone)]
pub enum Resource<V> {
    /// A refresh is in progress; `data` is the last known value, if any.
    Loading {
        /// Last known value, if any.
        data: Option<V>,
    },
    /// The current authoritative value.
    ///
    /// `data` is absent when no origin is configured and the store is empty.
    Success {
        /// The authoritative value.
        data: Option<V>,
    },
    /// The most recent refresh failed; `data` is the previously cached value.
    Error {
        /// Previously cached value, if any.
        data: Option<V>,
        /// Human-readable failure description.
        message: String,
        /// The underlying failure. Compared by pointer identity: an opaque
        /// cause has no structural equality.
        cause: Option<Arc<anyhow::Error>>,
    },
}

impl<V> Resource<V> {
    /// Creates a loading state carrying the last known value.
    #[must_use]
    pub fn loading(data: Option<V>) -> Self {
        Self::Loading { data }
    }

    /// Creates a success state.
    #[must_use]
    pub fn success(data: Option<V>) -> Self {
        Self::Success { data }
    }

    /// Creates an error state with an explicit message and cause.
    #[must_use]
    pub fn error(
        message: impl Into<String>,
        cause: Option<Arc<anyhow::Error>>,
        data: Option<V>,
    ) -> Self {
        Self::Error {
            data,
            message: message.into(),
            cause,
        }
    }

    /// Creates an error state from a failed origin call, preserving the
    /// previously cached value.
    #[must_use]
    pub fn from_origin_failure(err: anyhow::Error, data: Option<V>) -> Self {
        Self::Error {
            data,
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    /// The carried value, regardless of state.
    #[must_use]
    pub fn data(&self) -> Option<&V> {
        match self {
            Self::Loading { data } | Self::Success { data } | Self::Error { data, .. } => {
                data.as_ref()
            }
        }
    }

    /// Consumes the resource, returning the carried value.
    #[must_use]
    pub fn into_data(self) -> Option<V> {
        match self {
            Self::Loading { data } | Self::Success { data } | Self::Error { data, .. } => data,
        }
    }

    /// Whether a refresh is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// Whether this is the authoritative value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the most recent refresh failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The error message, when in the error state.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// The error cause, when in the error state.
    #[must_use]
    pub fn cause(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            Self::Error { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// Maps the carried value, preserving the state, message, and cause.
    #[must_use]
    pub fn map<R>(&self, map: impl FnOnce(Option<&V>) -> Option<R>) -> Resource<R> {
        let data = map(self.data());
        match self {
            Self::Loading { .. } => Resource::Loading { data },
            Self::Success { .. } => Resource::Success { data },
            Self::Error { message, cause, .. } => Resource::Error {
                data,
                message: message.clone(),
                cause: cause.clone(),
            },
        }
    }

    /// Combines two resources into one.
    ///
    /// The combined data is always `combine(self.data(), other.data())`.
    /// The combined state follows this table:
    ///
    /// | self \ other | Success      | Loading | Error        |
    /// |--------------|--------------|---------|--------------|
    /// | Success      | Success      | Loading | Error(other) |
    /// | Loading      | Loading      | Loading | Loading      |
    /// | Error        | Loading      | Loading | Error(self)  |
    ///
    /// When both sides are errors, the left-hand side's message and cause
    /// win.
    #[must_use]
    pub fn combine_with<U, R>(
        &self,
        other: &Resource<U>,
        combine: impl FnOnce(Option<&V>, Option<&U>) -> Option<R>,
    ) -> Resource<R> {
        let data = combine(self.data(), other.data());
        match (self, other) {
            (Self::Success { .. }, Resource::Success { .. }) => Resource::Success { data },
            (Self::Success { .. }, Resource::Error { message, cause, .. })
            | (Self::Error { message, cause, .. }, Resource::Error { .. }) => Resource::Error {
                data,
                message: message.clone(),
                cause: cause.clone(),
            },
            _ => Resource::Loading { data },
        }
    }
}

/// Structural equality over (state, data, message, cause), with the opaque
/// cause compared by pointer identity.
impl<V: PartialEq> PartialEq for Resource<V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Loading { data: a }, Self::Loading { data: b })
            | (Self::Success { data: a }, Self::Success { data: b }) => a == b,
            (
                Self::Error {
                    data: a,
                    message: message_a,
                    cause: cause_a,
                },
                Self::Error {
                    data: b,
                    message: message_b,
                    cause: cause_b,
                },
            ) => {
                a == b
                    && message_a == message_b
                    && match (cause_a, cause_b) {
                        (None, None) => true,
                        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                        _ => false,
                    }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn accessors_reflect_state() {
        let loading: Resource<i32> = Resource::loading(Some(1));
        assert!(loading.is_loading());
        assert_eq!(loading.data(), Some(&1));
        assert!(loading.message().is_none());

        let success: Resource<i32> = Resource::success(None);
        assert!(success.is_success());
        assert!(success.data().is_none());

        let error = Resource::from_origin_failure(anyhow!("boom"), Some(2));
        assert!(error.is_error());
        assert_eq!(error.data(), Some(&2));
        assert_eq!(error.message(), Some("boom"));
        assert!(error.cause().is_some());
    }

    #[test]
    fn into_data_moves_value_out() {
        let success = Resource::success(Some("v".to_string()));
        assert_eq!(success.into_data(), Some("v".to_string()));
    }

    #[test]
    fn equality_is_structural_on_data() {
        assert_eq!(Resource::success(Some(1)), Resource::success(Some(1)));
        assert_ne!(Resource::success(Some(1)), Resource::success(Some(2)));
        assert_ne!(Resource::success(Some(1)), Resource::loading(Some(1)));
        assert_eq!(
            Resource::<i32>::loading(None),
            Resource::<i32>::loading(None)
        );
    }

    #[test]
    fn error_equality_compares_cause_by_identity() {
        let cause = Arc::new(anyhow!("boom"));
        let a = Resource::error("boom", Some(Arc::clone(&cause)), Some(1));
        let b = Resource::error("boom", Some(Arc::clone(&cause)), Some(1));
        assert_eq!(a, b);

        let other_cause = Arc::new(anyhow!("boom"));
        let c = Resource::error("boom", Some(other_cause), Some(1));
        assert_ne!(a, c, "distinct causes must not compare equal");

        let no_cause: Resource<i32> = Resource::error("boom", None, Some(1));
        assert_ne!(a, no_cause);
        assert_eq!(no_cause, Resource::error("boom", None, Some(1)));
    }

    #[test]
    fn map_preserves_state_and_message() {
        let error = Resource::error("boom", None, Some(2));
        let mapped = error.map(|data| data.map(|v| v * 10));
        assert!(mapped.is_error());
        assert_eq!(mapped.data(), Some(&20));
        assert_eq!(mapped.message(), Some("boom"));

        let loading = Resource::loading(Some(1));
        assert!(loading.map(|data| data.copied()).is_loading());
    }

    fn add(a: Option<&i32>, b: Option<&i32>) -> Option<i32> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        }
    }

    #[test]
    fn combine_success_pairs() {
        let combined = Resource::success(Some(1)).combine_with(&Resource::success(Some(2)), add);
        assert!(combined.is_success());
        assert_eq!(combined.data(), Some(&3));
    }

    #[test]
    fn combine_loading_dominates() {
        let success = Resource::success(Some(1));
        let loading = Resource::loading(Some(2));
        let error = Resource::error("boom", None, Some(3));

        assert!(success.combine_with(&loading, add).is_loading());
        assert!(loading.combine_with(&success, add).is_loading());
        assert!(loading.combine_with(&loading, add).is_loading());
        assert!(loading.combine_with(&error, add).is_loading());
        assert!(error.combine_with(&loading, add).is_loading());
        // An error on the left of a success degrades to loading as well.
        assert!(error.combine_with(&success, add).is_loading());
    }

    #[test]
    fn combine_error_messages() {
        let success = Resource::success(Some(1));
        let left = Resource::error("left", None, Some(2));
        let right = Resource::error("right", None, Some(3));

        let combined = success.combine_with(&right, add);
        assert!(combined.is_error());
        assert_eq!(combined.message(), Some("right"));
        assert_eq!(combined.data(), Some(&4));

        // Both sides failed: the left-hand side wins.
        let combined = left.combine_with(&right, add);
        assert!(combined.is_error());
        assert_eq!(combined.message(), Some("left"));
        assert_eq!(combined.data(), Some(&5));
    }

    #[test]
    fn combine_data_always_applies_the_function() {
        let loading: Resource<i32> = Resource::loading(None);
        let success = Resource::success(Some(2));
        let combined = loading.combine_with(&success, add);
        assert!(combined.is_loading());
        assert_eq!(combined.data(), None, "missing side yields no combined data");
    }
}
