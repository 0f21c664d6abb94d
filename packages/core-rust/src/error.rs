//! Typed errors for cache construction, lifecycle, and pagination.
//!
//! Origin and storage failures travel as `anyhow::Error` through the trait
//! surfaces; this enum covers the failures with a contract the caller is
//! expected to branch on.

/// Errors surfaced by cache construction and pagination.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A persistent or secure family was constructed before the matching
    /// storage factory was registered.
    #[error("no {kind} storage factory configured (family `{family}`); register one during startup")]
    ConfigurationMissing {
        /// Which factory is absent: `"persistent"` or `"secure"`.
        kind: &'static str,
        /// The family whose construction failed.
        family: String,
    },

    /// Page verification failed: the overlap window did not match the
    /// cached tail, or a page repeated already-cached items. The expected
    /// caller response is to invalidate the key and reload.
    #[error("inconsistent page data for key {key}: {detail}")]
    InconsistentPageData {
        /// Debug rendering of the affected key.
        key: String,
        /// What the verification found.
        detail: String,
    },

    /// The coordinator was closed by `remove`, `clear_all`, or `close`.
    #[error("cache family `{family}` is closed")]
    Closed {
        /// The family whose coordinator is closed.
        family: String,
    },

    /// Invalid construction parameters.
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// The origin call failed while loading a page.
    #[error("origin call failed: {0}")]
    Origin(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_missing_names_the_factory() {
        let err = CacheError::ConfigurationMissing {
            kind: "persistent",
            family: "products".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("persistent"));
        assert!(rendered.contains("products"));
    }

    #[test]
    fn origin_wraps_anyhow() {
        let err: CacheError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(err, CacheError::Origin(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn inconsistent_page_data_renders_key_and_detail() {
        let err = CacheError::InconsistentPageData {
            key: "\"products\"".to_string(),
            detail: "overlap mismatch".to_string(),
        };
        assert!(err.to_string().contains("overlap mismatch"));
    }
}
