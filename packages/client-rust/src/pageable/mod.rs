//! Pagination strategies layered on the family coordinator.
//!
//! Both variants own an inner `ResourceCache<K, PageBundle<V, M>>` whose
//! origin loader fetches the first page; `load_next_page` merges follow-up
//! pages into the cached bundle under the key's update lock.

use std::sync::atomic::{AtomicBool, Ordering};

use wellspring_core::CacheError;

mod offset;
mod size;

pub use offset::{OffsetPageCache, OffsetPageConfig};
pub use size::{DefaultSizePagePolicy, SizePageCache, SizePageConfig, SizePagePolicy};

/// RAII reset for the coordinator-scoped page-load flag.
///
/// Clears the flag when dropped, so a failed page load never wedges the
/// coordinator.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Recovers the typed error a page merge smuggled through the update path.
fn into_cache_error(err: anyhow::Error) -> CacheError {
    match err.downcast::<CacheError>() {
        Ok(cache_err) => cache_err,
        Err(other) => CacheError::Origin(other),
    }
}
