//! Offset+intersection pagination over a cached bundle.
//!
//! Each page is requested at `offset = loaded - intersection_count`, so the
//! first `intersection_count` fetched items re-cover the cached tail. A
//! mismatch in that window means the origin's list changed underneath the
//! cache and surfaces as [`CacheError::InconsistentPageData`].

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use wellspring_core::{
    CacheError, ClockSource, DefaultPageBundleFactory, PageBundle, PageBundleFactory, Resource,
    StalenessPolicy, SystemClock,
};

use crate::config;
use crate::coordinator::{CacheOptions, ResourceCache, ResourceSubscription};
use crate::origin::{Fetch, OffsetPageSource};
use crate::storage::{CodecStorage, MemoryBackend, StorageBackend};

use super::{into_cache_error, LoadingGuard};

/// Construction parameters for [`OffsetPageCache`].
pub struct OffsetPageConfig<V, M = ()> {
    /// Items requested per page (the origin call's `limit`). Must exceed
    /// `intersection_count`.
    pub page_size: usize,
    /// Trailing items re-requested on each page to detect server-side
    /// changes.
    pub intersection_count: usize,
    /// Whether the overlap window is verified against the cached tail.
    pub duplicates_detection_enabled: bool,
    /// How long a cached bundle stays fresh. `None` means only explicit
    /// invalidation refreshes it.
    pub cache_duration: Option<Duration>,
    /// Clock stamping stored bundles, injectable for tests.
    pub clock: Arc<dyn ClockSource>,
    /// Builds the stored bundles; swap to customize meta handling.
    pub bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
}

impl<V, M> Default for OffsetPageConfig<V, M> {
    fn default() -> Self {
        Self {
            page_size: 20,
            intersection_count: 0,
            duplicates_detection_enabled: true,
            cache_duration: None,
            clock: Arc::new(SystemClock),
            bundle_factory: Arc::new(DefaultPageBundleFactory),
        }
    }
}

/// Pagination coordinator for origins addressed by offset and limit.
///
/// Owns an inner [`ResourceCache`] of [`PageBundle`]s whose origin loader
/// fetches the first page; `load_next_page` grows the cached bundle.
pub struct OffsetPageCache<K, V, M = ()> {
    inner: ResourceCache<K, PageBundle<V, M>>,
    source: Arc<dyn OffsetPageSource<K, V>>,
    page_size: usize,
    intersection_count: usize,
    duplicates_detection_enabled: bool,
    bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
    /// Coordinator-scoped single-flight flag for `load_next_page`.
    loading: AtomicBool,
}

impl<K, V, M> OffsetPageCache<K, V, M>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    M: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a coordinator over the built-in in-memory backend.
    pub fn in_memory(
        name: impl Into<String>,
        source: Arc<dyn OffsetPageSource<K, V>>,
        config: OffsetPageConfig<V, M>,
    ) -> Result<Self, CacheError> {
        let storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>> =
            Arc::new(MemoryBackend::new(Arc::clone(&config.clock)));
        Self::with_storage(name, source, storage, config)
    }

    /// Creates a coordinator over an explicit storage backend.
    pub fn with_storage(
        name: impl Into<String>,
        source: Arc<dyn OffsetPageSource<K, V>>,
        storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
        config: OffsetPageConfig<V, M>,
    ) -> Result<Self, CacheError> {
        if config.page_size <= config.intersection_count {
            return Err(CacheError::InvalidConfiguration(format!(
                "page_size ({}) must exceed intersection_count ({})",
                config.page_size, config.intersection_count
            )));
        }
        let loader = Arc::new(FirstPageLoader {
            storage: Arc::clone(&storage),
            source: Arc::clone(&source),
            page_size: config.page_size,
            bundle_factory: Arc::clone(&config.bundle_factory),
        });
        let policy = config
            .cache_duration
            .map_or(StalenessPolicy::NeverStale, StalenessPolicy::MaxAge);
        let inner = ResourceCache::with_storage(
            name,
            storage,
            CacheOptions {
                fetch: Some(loader as Arc<dyn Fetch<K, PageBundle<V, M>>>),
                policy,
                clock: Arc::clone(&config.clock),
                cache_last_emitted: None,
                decode: None,
            },
        );
        Ok(Self {
            inner,
            source,
            page_size: config.page_size,
            intersection_count: config.intersection_count,
            duplicates_detection_enabled: config.duplicates_detection_enabled,
            bundle_factory: config.bundle_factory,
            loading: AtomicBool::new(false),
        })
    }

    /// Subscribes to a key's bundle stream and requests a first-page load.
    pub async fn subscribe(
        &self,
        key: &K,
        force_reload: bool,
    ) -> Result<ResourceSubscription<PageBundle<V, M>>, CacheError> {
        self.inner.subscribe(key, force_reload).await
    }

    /// First settled bundle resource for a key.
    pub async fn get(
        &self,
        key: &K,
        force_reload: bool,
        allow_loading: bool,
    ) -> Result<Resource<PageBundle<V, M>>, CacheError> {
        self.inner.get(key, force_reload, allow_loading).await
    }

    /// Marks a key's bundle stale; the next load refetches the first page
    /// and drops later pages unless the cached prefix still matches.
    pub async fn invalidate(
        &self,
        key: &K,
        force_reload: bool,
        emit_loading_on_reload: bool,
    ) -> anyhow::Result<()> {
        self.inner
            .invalidate(key, force_reload, emit_loading_on_reload)
            .await
    }

    /// The cached bundle for a key, if any.
    pub async fn get_cached_value(
        &self,
        key: &K,
        synchronized: bool,
    ) -> anyhow::Result<Option<PageBundle<V, M>>> {
        self.inner.get_cached_value(key, synchronized).await
    }

    /// Closes and erases a key's coordinator and deletes its bundle.
    pub async fn remove(&self, key: &K) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }

    /// Erases every coordinator, optionally closing subscriptions, and
    /// clears the storage.
    pub async fn clear_all(&self, close_subscriptions: bool) -> anyhow::Result<()> {
        self.inner.clear_all(close_subscriptions).await
    }

    /// Fetches the next page and merges it into the cached bundle.
    ///
    /// A call while another page load is in flight, or once the bundle is
    /// exhausted, is a logged no-op. An overlap mismatch surfaces as
    /// [`CacheError::InconsistentPageData`] and leaves the bundle
    /// untouched; the expected response is to invalidate the key.
    pub async fn load_next_page(&self, key: &K) -> Result<(), CacheError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            tracing::debug!(family = %self.inner.name(), key = ?key, "page load already in flight");
            return Ok(());
        }
        let _guard = LoadingGuard(&self.loading);

        let current = self.inner.get(key, false, false).await?;
        let current_bundle = current.data();
        if current_bundle.is_some_and(|bundle| bundle.loaded_all) {
            tracing::debug!(family = %self.inner.name(), key = ?key, "all pages already loaded");
            return Ok(());
        }
        let loaded = current_bundle.map_or(0, PageBundle::len);
        let offset = loaded.saturating_sub(self.intersection_count);
        let expected_overlap = if offset == 0 {
            loaded
        } else {
            self.intersection_count
        };

        let new_page = self.source.load_page(key, offset, self.page_size).await?;

        let page_size = self.page_size;
        let verify_overlap = self.duplicates_detection_enabled && expected_overlap > 0;
        let bundle_factory = Arc::clone(&self.bundle_factory);
        let key_repr = format!("{key:?}");
        let merge = move |cached: Option<PageBundle<V, M>>| {
            let old = cached.map(|bundle| bundle.items).unwrap_or_default();
            if verify_overlap {
                let tail_matches = old.len() >= expected_overlap
                    && new_page.len() >= expected_overlap
                    && old[old.len() - expected_overlap..] == new_page[..expected_overlap];
                if !tail_matches {
                    return Err(CacheError::InconsistentPageData {
                        key: key_repr,
                        detail: format!(
                            "the first {expected_overlap} fetched item(s) do not match the cached tail"
                        ),
                    }
                    .into());
                }
            }
            let fresh = new_page.get(expected_overlap..).unwrap_or_default();
            let loaded_all = new_page.len() < page_size;
            let mut items = old;
            items.extend(fresh.iter().cloned());
            Ok(Some(bundle_factory.create(items, loaded_all, None, None)))
        };

        match self.inner.update_cached_value(key, merge, false).await {
            Ok(_) => Ok(()),
            Err(err) => Err(into_cache_error(err)),
        }
    }
}

impl<K, V, M> OffsetPageCache<K, V, M>
where
    K: Clone + Eq + Hash + fmt::Debug + Serialize + Send + Sync + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    M: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a coordinator over the registered persistent storage
    /// factory.
    pub fn persistent(
        name: impl Into<String>,
        source: Arc<dyn OffsetPageSource<K, V>>,
        config: OffsetPageConfig<V, M>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let factory = config::persistent_factory(&name)?;
        let raw = factory.create(&name)?;
        let storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>> = Arc::new(
            CodecStorage::<K, PageBundle<V, M>>::new(raw, Arc::clone(&config.clock)),
        );
        Self::with_storage(name, source, storage, config)
    }
}

/// First-page origin loader for the inner family.
///
/// Reads the current bundle straight from the shared storage (the unlocked
/// read every fetch-side callback is limited to) so a refetch that matches
/// the cached prefix can reuse the whole bundle, keeping pages past the
/// first across an invalidate-refresh cycle.
struct FirstPageLoader<K, V, M> {
    storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
    source: Arc<dyn OffsetPageSource<K, V>>,
    page_size: usize,
    bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
}

#[async_trait]
impl<K, V, M> Fetch<K, PageBundle<V, M>> for FirstPageLoader<K, V, M>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    M: Clone + PartialEq + Send + Sync + 'static,
{
    async fn fetch(&self, key: &K) -> anyhow::Result<PageBundle<V, M>> {
        let first_page = self.source.load_page(key, 0, self.page_size).await?;
        if let Some(entry) = self.storage.get_or_null(key).await? {
            let cached = entry.value;
            if cached.items.len() >= first_page.len()
                && cached.items[..first_page.len()] == first_page[..]
            {
                return Ok(cached);
            }
        }
        let loaded_all = first_page.len() < self.page_size;
        Ok(self
            .bundle_factory
            .create(first_page, loaded_all, None, None))
    }
}
