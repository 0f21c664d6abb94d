//! Page+size pagination over a cached bundle.
//!
//! Pages are addressed by a 1-based page number persisted in the bundle's
//! cursor. The cursor only advances when a full page arrives, so a partial
//! page always marks the sequence as exhausted rather than skewing later
//! requests.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use wellspring_core::{
    CacheError, ClockSource, DefaultPageBundleFactory, PageBundle, PageBundleFactory,
    PageResponse, Resource, StalenessPolicy, SystemClock,
};

use crate::config;
use crate::coordinator::{CacheOptions, ResourceCache, ResourceSubscription};
use crate::origin::{Fetch, SizePageSource};
use crate::storage::{CodecStorage, MemoryBackend, StorageBackend};

use super::{into_cache_error, LoadingGuard};

/// Customization hooks for the size strategy.
///
/// All hooks have conservative defaults: no extra consistency checks, no
/// bundle meta, and no cache reuse across first-page refetches.
pub trait SizePagePolicy<V, M>: Send + Sync {
    /// Extra verification between the cached bundle and a fetched page; an
    /// error aborts the merge and surfaces to the caller.
    fn check_consistency(
        &self,
        _cached: &PageBundle<V, M>,
        _response: &PageResponse<V, M>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Builds the merged bundle's meta. `cached` is `None` on a first-page
    /// load.
    fn build_meta(
        &self,
        _cached: Option<&PageBundle<V, M>>,
        _response: &PageResponse<V, M>,
    ) -> Option<M> {
        None
    }

    /// Whether a cached bundle can be reused unchanged when the refetched
    /// first page arrives.
    fn can_reuse_cache(&self, _cached: &PageBundle<V, M>, _first: &PageResponse<V, M>) -> bool {
        false
    }
}

/// The default, all-conservative [`SizePagePolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSizePagePolicy;

impl<V, M> SizePagePolicy<V, M> for DefaultSizePagePolicy {}

/// Construction parameters for [`SizePageCache`].
pub struct SizePageConfig<V, M = ()> {
    /// Items requested per page (the origin call's `size`). Must be at
    /// least 1.
    pub page_size: usize,
    /// Whether a fetched page is rejected when it repeats cached items.
    pub duplicates_detection_enabled: bool,
    /// How long a cached bundle stays fresh. `None` means only explicit
    /// invalidation refreshes it.
    pub cache_duration: Option<Duration>,
    /// Clock stamping stored bundles, injectable for tests.
    pub clock: Arc<dyn ClockSource>,
    /// Builds the stored bundles; swap to customize meta handling.
    pub bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
    /// Consistency, meta, and reuse hooks.
    pub hooks: Arc<dyn SizePagePolicy<V, M>>,
}

impl<V, M> Default for SizePageConfig<V, M> {
    fn default() -> Self {
        Self {
            page_size: 20,
            duplicates_detection_enabled: true,
            cache_duration: None,
            clock: Arc::new(SystemClock),
            bundle_factory: Arc::new(DefaultPageBundleFactory),
            hooks: Arc::new(DefaultSizePagePolicy),
        }
    }
}

/// Pagination coordinator for origins addressed by page number and size.
pub struct SizePageCache<K, V, M = ()> {
    inner: ResourceCache<K, PageBundle<V, M>>,
    source: Arc<dyn SizePageSource<K, V, M>>,
    page_size: usize,
    duplicates_detection_enabled: bool,
    bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
    hooks: Arc<dyn SizePagePolicy<V, M>>,
    /// Coordinator-scoped single-flight flag for `load_next_page`.
    loading: AtomicBool,
}

impl<K, V, M> SizePageCache<K, V, M>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    M: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a coordinator over the built-in in-memory backend.
    pub fn in_memory(
        name: impl Into<String>,
        source: Arc<dyn SizePageSource<K, V, M>>,
        config: SizePageConfig<V, M>,
    ) -> Result<Self, CacheError> {
        let storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>> =
            Arc::new(MemoryBackend::new(Arc::clone(&config.clock)));
        Self::with_storage(name, source, storage, config)
    }

    /// Creates a coordinator over an explicit storage backend.
    pub fn with_storage(
        name: impl Into<String>,
        source: Arc<dyn SizePageSource<K, V, M>>,
        storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
        config: SizePageConfig<V, M>,
    ) -> Result<Self, CacheError> {
        if config.page_size == 0 {
            return Err(CacheError::InvalidConfiguration(
                "page_size must be at least 1".to_string(),
            ));
        }
        let loader = Arc::new(FirstPageLoader {
            storage: Arc::clone(&storage),
            source: Arc::clone(&source),
            page_size: config.page_size,
            bundle_factory: Arc::clone(&config.bundle_factory),
            hooks: Arc::clone(&config.hooks),
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
            duplicates_detection_enabled: config.duplicates_detection_enabled,
            bundle_factory: config.bundle_factory,
            hooks: config.hooks,
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

    /// Marks a key's bundle stale; the next load refetches from page 1.
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

    /// Fetches the page at the persisted cursor and merges it into the
    /// cached bundle.
    ///
    /// A call while another page load is in flight, or once the bundle is
    /// exhausted, is a logged no-op. A bundle that changed concurrently
    /// between the cursor read and the merge wins over the fetched page,
    /// which is discarded. Duplicate items surface as
    /// [`CacheError::InconsistentPageData`].
    pub async fn load_next_page(&self, key: &K) -> Result<(), CacheError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            tracing::debug!(family = %self.inner.name(), key = ?key, "page load already in flight");
            return Ok(());
        }
        let _guard = LoadingGuard(&self.loading);

        let current = self.inner.get(key, false, false).await?;
        let snapshot = current.data().cloned();
        if snapshot.as_ref().is_some_and(|bundle| bundle.loaded_all) {
            tracing::debug!(family = %self.inner.name(), key = ?key, "all pages already loaded");
            return Ok(());
        }
        let next_page = snapshot
            .as_ref()
            .and_then(|bundle| bundle.next_page)
            .unwrap_or(1);

        let response = self.source.load_page(key, next_page, self.page_size).await?;

        let page_size = self.page_size;
        let detect_duplicates = self.duplicates_detection_enabled;
        let hooks = Arc::clone(&self.hooks);
        let bundle_factory = Arc::clone(&self.bundle_factory);
        let key_repr = format!("{key:?}");
        let family = self.inner.name().to_string();
        let merge = move |cached: Option<PageBundle<V, M>>| {
            if cached != snapshot {
                // A concurrent update to the bundle wins over this page.
                tracing::debug!(
                    family = %family,
                    key = %key_repr,
                    "bundle changed concurrently; discarding fetched page"
                );
                return Ok(cached);
            }
            if detect_duplicates {
                if let Some(cached) = &cached {
                    let repeats = response
                        .items
                        .iter()
                        .any(|item| cached.items.contains(item));
                    if repeats {
                        return Err(CacheError::InconsistentPageData {
                            key: key_repr,
                            detail: "fetched page repeats already cached items".to_string(),
                        }
                        .into());
                    }
                }
            }
            if let Some(cached) = &cached {
                hooks.check_consistency(cached, &response)?;
            }
            let meta = hooks.build_meta(cached.as_ref(), &response);
            let loaded_all = response.items.len() < page_size;
            let next = if loaded_all { None } else { Some(next_page + 1) };
            let mut items = cached.map(|bundle| bundle.items).unwrap_or_default();
            items.extend(response.items);
            Ok(Some(bundle_factory.create(items, loaded_all, next, meta)))
        };

        match self.inner.update_cached_value(key, merge, false).await {
            Ok(_) => Ok(()),
            Err(err) => Err(into_cache_error(err)),
        }
    }
}

impl<K, V, M> SizePageCache<K, V, M>
where
    K: Clone + Eq + Hash + fmt::Debug + Serialize + Send + Sync + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    M: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a coordinator over the registered persistent storage
    /// factory.
    pub fn persistent(
        name: impl Into<String>,
        source: Arc<dyn SizePageSource<K, V, M>>,
        config: SizePageConfig<V, M>,
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
struct FirstPageLoader<K, V, M> {
    storage: Arc<dyn StorageBackend<K, PageBundle<V, M>>>,
    source: Arc<dyn SizePageSource<K, V, M>>,
    page_size: usize,
    bundle_factory: Arc<dyn PageBundleFactory<V, M>>,
    hooks: Arc<dyn SizePagePolicy<V, M>>,
}

#[async_trait]
impl<K, V, M> Fetch<K, PageBundle<V, M>> for FirstPageLoader<K, V, M>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    M: Clone + PartialEq + Send + Sync + 'static,
{
    async fn fetch(&self, key: &K) -> anyhow::Result<PageBundle<V, M>> {
        let response = self.source.load_page(key, 1, self.page_size).await?;
        if let Some(entry) = self.storage.get_or_null(key).await? {
            if self.hooks.can_reuse_cache(&entry.value, &response) {
                return Ok(entry.value);
            }
        }
        let loaded_all = response.items.len() < self.page_size;
        let next_page = if loaded_all { None } else { Some(2) };
        let meta = self.hooks.build_meta(None, &response);
        Ok(self
            .bundle_factory
            .create(response.items, loaded_all, next_page, meta))
    }
}
