//! Per-key coordination: the refresh state machine, single-flight latch,
//! and event bus.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;

use wellspring_core::{CacheError, ClockSource, Resource, StalenessPolicy, StorageEntry};

use crate::origin::Fetch;
use crate::storage::StorageBackend;

use super::subscription::ResourceSubscription;

/// Capacity of the per-key broadcast bus. A subscriber that falls further
/// behind than this skips ahead (the subscription logs the gap).
const BUS_CAPACITY: usize = 64;

/// Single-flight latch for the refresh state machine.
#[derive(Debug, Default)]
struct LoadFlags {
    /// A refresh is in flight.
    is_loading: bool,
    /// Another refresh must start as soon as the current one finishes.
    should_reload: bool,
}

/// Event bus plus the last-emitted slot it feeds.
struct Bus<V> {
    /// `None` once closed; new subscriptions then fail.
    sender: Option<broadcast::Sender<Resource<V>>>,
    /// Last successfully emitted value. Disabled (always `None`) for
    /// secure families so values do not linger in process memory.
    last_emitted: Option<V>,
}

/// Coordinates one key of a family: storage access, origin refreshes, and
/// event broadcast.
///
/// At most one origin call is in flight per key; concurrent demand latches
/// a reload instead of fetching again. The operation lock serializes
/// storage mutation and is held across the origin call, so
/// [`get_cached_value`](KeyCache::get_cached_value) with
/// `synchronized = false` is the only cache entry point usable from inside
/// a fetch or edit callback.
pub struct KeyCache<K, V> {
    key: K,
    family: String,
    storage: Arc<dyn StorageBackend<K, V>>,
    fetch: Option<Arc<dyn Fetch<K, V>>>,
    policy: StalenessPolicy<K, V>,
    clock: Arc<dyn ClockSource>,
    cache_last_emitted: bool,
    /// Self-reference for spawning refresh tasks and for subscriptions to
    /// keep a detached coordinator alive.
    weak_self: Weak<KeyCache<K, V>>,
    /// Serializes storage mutation and the emissions that depend on it.
    op_lock: AsyncMutex<()>,
    flags: SyncMutex<LoadFlags>,
    bus: SyncMutex<Bus<V>>,
}

impl<K, V> KeyCache<K, V>
where
    K: Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(
        key: K,
        family: String,
        storage: Arc<dyn StorageBackend<K, V>>,
        fetch: Option<Arc<dyn Fetch<K, V>>>,
        policy: StalenessPolicy<K, V>,
        clock: Arc<dyn ClockSource>,
        cache_last_emitted: bool,
    ) -> Arc<Self> {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Arc::new_cyclic(|weak_self| Self {
            key,
            family,
            storage,
            fetch,
            policy,
            clock,
            cache_last_emitted,
            weak_self: weak_self.clone(),
            op_lock: AsyncMutex::new(()),
            flags: SyncMutex::new(LoadFlags::default()),
            bus: SyncMutex::new(Bus {
                sender: Some(sender),
                last_emitted: None,
            }),
        })
    }

    /// The key this coordinator manages.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Subscribes to this key's resource stream and requests a load.
    ///
    /// The subscription starts with a synthetic `Loading` carrying the last
    /// emitted value, then forwards live emissions with consecutive
    /// duplicates suppressed. Fails synchronously once the coordinator is
    /// closed.
    pub fn subscribe(&self, force_reload: bool) -> Result<ResourceSubscription<V>, CacheError> {
        let (initial, receiver) = {
            let bus = self.bus.lock();
            let Some(sender) = bus.sender.as_ref() else {
                return Err(self.closed_error());
            };
            (
                Resource::loading(bus.last_emitted.clone()),
                sender.subscribe(),
            )
        };
        self.spawn_load(force_reload);
        let keep_alive = self
            .weak_self
            .upgrade()
            .map(|this| this as Arc<dyn Any + Send + Sync>);
        Ok(ResourceSubscription::new(initial, receiver, keep_alive))
    }

    /// First settled resource: a non-loading state, or a loading state
    /// carrying data when `allow_loading` is set.
    pub async fn get(
        &self,
        force_reload: bool,
        allow_loading: bool,
    ) -> Result<Resource<V>, CacheError> {
        let mut subscription = self.subscribe(force_reload)?;
        subscription
            .first_settled(allow_loading)
            .await
            .ok_or_else(|| self.closed_error())
    }

    /// Marks the stored entry stale by rewriting its store time to the
    /// invalidation marker, preserving the value.
    ///
    /// With `force_reload` and at least one active subscriber, a reload is
    /// requested and awaited to its next non-loading emission; with
    /// `emit_loading_on_reload` a `Loading` carrying the last emitted value
    /// is broadcast before that wait.
    pub async fn invalidate(
        &self,
        force_reload: bool,
        emit_loading_on_reload: bool,
    ) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        {
            let _guard = self.op_lock.lock().await;
            if let Some(entry) = self.storage.get_or_null(&self.key).await? {
                self.storage
                    .put(&self.key, entry.value, Some(StorageEntry::<V>::INVALIDATED))
                    .await?;
            }
        }
        if force_reload && self.has_subscribers() {
            if emit_loading_on_reload {
                let data = self.bus.lock().last_emitted.clone();
                self.emit(Resource::loading(data));
            }
            let mut subscription = self.subscribe(true)?;
            let _ = subscription.first_settled(false).await;
        }
        Ok(())
    }

    /// Edits the stored value under the operation lock.
    ///
    /// A `Some` result is written back with the entry's original store time
    /// (an edit does not refresh staleness) and broadcast as `Success`. A
    /// `None` result removes an existing entry and, when `notify_on_none`,
    /// broadcasts `Success(None)`. The edit's error aborts without touching
    /// storage.
    pub async fn update_cached_value<F>(
        &self,
        edit: F,
        notify_on_none: bool,
    ) -> anyhow::Result<Option<V>>
    where
        F: FnOnce(Option<V>) -> anyhow::Result<Option<V>> + Send,
    {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        let _guard = self.op_lock.lock().await;

        let entry = self.storage.get_or_null(&self.key).await?;
        let store_time = entry.as_ref().map(|entry| entry.store_time);
        let existed = entry.is_some();

        match edit(entry.map(|entry| entry.value))? {
            Some(value) => {
                self.storage
                    .put(&self.key, value.clone(), Some(store_time.unwrap_or(0)))
                    .await?;
                self.emit(Resource::success(Some(value.clone())));
                Ok(Some(value))
            }
            None => {
                if existed {
                    self.storage.remove(&self.key).await?;
                    if notify_on_none {
                        self.emit(Resource::success(None));
                    }
                }
                Ok(None)
            }
        }
    }

    /// The stored value, if any.
    ///
    /// `synchronized = false` skips the operation lock and is the only form
    /// callable from inside a fetch or edit callback.
    pub async fn get_cached_value(&self, synchronized: bool) -> anyhow::Result<Option<V>> {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        let _guard = if synchronized {
            Some(self.op_lock.lock().await)
        } else {
            None
        };
        Ok(self
            .storage
            .get_or_null(&self.key)
            .await?
            .map(|entry| entry.value))
    }

    /// Stores `value` with the current time and broadcasts `Success`.
    pub async fn put_value(&self, value: V) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        let _guard = self.op_lock.lock().await;
        self.storage
            .put(&self.key, value.clone(), Some(self.clock.now_millis()))
            .await?;
        self.emit(Resource::success(Some(value)));
        Ok(())
    }

    /// Removes the stored entry and forgets the last emitted value.
    pub async fn clear_cache(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        let _guard = self.op_lock.lock().await;
        self.storage.remove(&self.key).await?;
        self.bus.lock().last_emitted = None;
        Ok(())
    }

    /// Closes the bus. Subscribers drain buffered emissions and end; new
    /// subscriptions fail. In-flight origin calls complete but their
    /// results are discarded.
    pub fn close(&self) {
        let mut bus = self.bus.lock();
        bus.sender = None;
        bus.last_emitted = None;
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.bus.lock().sender.is_none()
    }

    /// Whether any subscription is currently attached.
    pub fn has_subscribers(&self) -> bool {
        self.bus
            .lock()
            .sender
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    fn closed_error(&self) -> CacheError {
        CacheError::Closed {
            family: self.family.clone(),
        }
    }

    fn spawn_load(&self, force_reload: bool) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.request_loading(force_reload).await;
        });
    }

    /// The refresh state machine.
    ///
    /// A request while a refresh is in flight latches `should_reload`; the
    /// running epoch starts one follow-up epoch when it finishes, so any
    /// burst of concurrent reload requests costs at most one extra origin
    /// call.
    pub(crate) async fn request_loading(&self, force_reload: bool) {
        let mut force = force_reload;
        loop {
            if self.is_closed() {
                return;
            }
            {
                let mut flags = self.flags.lock();
                if force {
                    flags.should_reload = true;
                }
                if flags.is_loading {
                    tracing::debug!(
                        family = %self.family,
                        key = ?self.key,
                        "refresh already in flight; reload latched"
                    );
                    return;
                }
                flags.is_loading = true;
            }

            if let Some(fetch) = self.fetch.clone() {
                self.load_from_external(&fetch).await;
            } else {
                self.load_from_cache().await;
            }

            let reload = {
                let mut flags = self.flags.lock();
                flags.is_loading = false;
                flags.should_reload
            };
            if !reload {
                return;
            }
            force = true;
        }
    }

    /// Load path for families without an origin: the store is authoritative.
    async fn load_from_cache(&self) {
        let _guard = self.op_lock.lock().await;
        self.flags.lock().should_reload = false;
        match self.storage.get_or_null(&self.key).await {
            Ok(entry) => {
                self.emit(Resource::success(entry.map(|entry| entry.value)));
            }
            Err(err) => {
                tracing::error!(
                    family = %self.family,
                    key = ?self.key,
                    error = %err,
                    "failed to read stored value"
                );
                self.emit(Resource::from_origin_failure(err, None));
            }
        }
    }

    /// Load path for families with an origin.
    async fn load_from_external(&self, fetch: &Arc<dyn Fetch<K, V>>) {
        let _guard = self.op_lock.lock().await;

        // Step 1: Read the cached entry.
        let cached = match self.storage.get_or_null(&self.key).await {
            Ok(cached) => cached,
            Err(err) => {
                self.flags.lock().should_reload = false;
                tracing::error!(
                    family = %self.family,
                    key = ?self.key,
                    error = %err,
                    "failed to decode stored value"
                );
                self.emit(Resource::from_origin_failure(err, None));
                return;
            }
        };
        let cached_value = cached.as_ref().map(|entry| entry.value.clone());

        // Step 2: Show the last known value while the decision is pending.
        if self.bus.lock().last_emitted != cached_value {
            self.emit(Resource::loading(cached_value.clone()));
        }

        // Step 3: Decide whether the origin must be consulted, consuming
        // the reload latch.
        let needs_origin = {
            let mut flags = self.flags.lock();
            let forced = flags.should_reload;
            flags.should_reload = false;
            forced
                || cached.as_ref().is_some_and(|entry| {
                    self.policy
                        .is_stale(&self.key, entry, self.clock.now_millis())
                })
        };

        // Step 4: Fresh hit -- the cached value is authoritative.
        if !needs_origin {
            if let Some(entry) = cached {
                self.emit(Resource::success(Some(entry.value)));
                return;
            }
        }

        // Step 5: Consult the origin.
        tracing::debug!(family = %self.family, key = ?self.key, "loading from origin");
        match fetch.fetch(&self.key).await {
            Ok(value) => {
                if self.is_closed() {
                    tracing::debug!(
                        family = %self.family,
                        key = ?self.key,
                        "discarding origin result for closed coordinator"
                    );
                    return;
                }
                let store_time = self.clock.now_millis();
                if let Err(err) = self
                    .storage
                    .put(&self.key, value.clone(), Some(store_time))
                    .await
                {
                    tracing::error!(
                        family = %self.family,
                        key = ?self.key,
                        error = %err,
                        "failed to store origin result"
                    );
                    self.emit(Resource::from_origin_failure(err, cached_value));
                    return;
                }
                self.emit(Resource::success(Some(value)));
            }
            Err(err) => {
                tracing::warn!(
                    family = %self.family,
                    key = ?self.key,
                    error = %err,
                    "origin call failed"
                );
                self.emit(Resource::from_origin_failure(err, cached_value));
            }
        }
    }

    /// Broadcasts `resource`, maintaining the last-emitted slot. A closed
    /// bus swallows the emission.
    fn emit(&self, resource: Resource<V>) {
        let mut bus = self.bus.lock();
        if bus.sender.is_none() {
            return;
        }
        if self.cache_last_emitted {
            if let Resource::Success { data } = &resource {
                bus.last_emitted = data.clone();
            }
        }
        if let Some(sender) = bus.sender.as_ref() {
            // A send error only means no subscriber is attached right now.
            let _ = sender.send(resource);
        }
    }
}
