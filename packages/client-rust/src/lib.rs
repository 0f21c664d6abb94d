//! Wellspring Client — keyed, observable, single-flight resource caching
//! with pluggable storage, staleness policies, and pagination.
//!
//! One [`ResourceCache`] coordinates a family of keys: each key holds the
//! last known value in a shared storage backend, broadcasts
//! loading/success/error transitions to any number of subscribers, and
//! refreshes from the origin at most once at a time. [`OffsetPageCache`]
//! and [`SizePageCache`] compose origin page calls into a single cached,
//! growing bundle on top of the same primitives.

pub mod config;
pub mod coordinator;
pub mod origin;
pub mod pageable;
pub mod storage;

pub use coordinator::{CacheOptions, KeyCache, ResourceCache, ResourceSubscription};
pub use origin::{Fetch, OffsetPageSource, SizePageSource};
pub use pageable::{
    DefaultSizePagePolicy, OffsetPageCache, OffsetPageConfig, SizePageCache, SizePageConfig,
    SizePagePolicy,
};
pub use storage::{
    CodecStorage, DecodeFn, MemoryBackend, MemoryRawStorage, MemoryRawStorageFactory, RawEntry,
    RawStorage, RawStorageFactory, StorageBackend,
};

pub use wellspring_core::{
    CacheError, ClockSource, DefaultPageBundleFactory, ManualClock, PageBundle, PageBundleFactory,
    PageResponse, Resource, StalenessPolicy, StorageEntry, SystemClock,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}

/// Scenario tests for the full subscribe -> load -> emit pipeline.
#[cfg(test)]
mod scenario_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::coordinator::{CacheOptions, ResourceCache};
    use crate::origin::Fetch;
    use crate::storage::{MemoryBackend, StorageBackend};
    use crate::{ClockSource, ManualClock, Resource, StalenessPolicy};

    /// Origin double: a fixed value, an optional delay, an optional
    /// failure, and a call counter.
    struct ScriptedFetch {
        value: i32,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedFetch {
        fn value(value: i32) -> Self {
            Self {
                value,
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(value: i32, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::value(value)
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::value(0)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch<String, i32> for ScriptedFetch {
        async fn fetch(&self, _key: &String) -> anyhow::Result<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("origin unavailable");
            }
            Ok(self.value)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        storage: Arc<MemoryBackend<String, i32>>,
        fetch: Arc<ScriptedFetch>,
        family: ResourceCache<String, i32>,
    }

    fn make_fixture(now: i64, fetch: ScriptedFetch, staleness: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::new(now));
        let storage = Arc::new(MemoryBackend::new(clock.clone() as Arc<dyn ClockSource>));
        let fetch = Arc::new(fetch);
        let family = ResourceCache::with_storage(
            "scenario",
            storage.clone() as Arc<dyn StorageBackend<String, i32>>,
            CacheOptions {
                fetch: Some(fetch.clone() as Arc<dyn Fetch<String, i32>>),
                policy: StalenessPolicy::max_age(staleness),
                clock: clock.clone() as Arc<dyn ClockSource>,
                ..CacheOptions::default()
            },
        );
        Fixture {
            clock,
            storage,
            fetch,
            family,
        }
    }

    // --- S1: a fresh cached value is served without an origin call ---

    #[tokio::test]
    async fn fresh_hit_serves_the_cache_without_the_origin() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_millis(100));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(1_000)).await.unwrap();

        let mut subscription = fixture.family.subscribe(&key, false).await.unwrap();
        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(1))));

        assert_eq!(fixture.fetch.calls(), 0, "a fresh entry must not hit the origin");

        // A second subscriber settles straight to success: the last emitted
        // value already matches the cache, so no pre-load loading fires.
        let mut second = fixture.family.subscribe(&key, false).await.unwrap();
        assert_eq!(second.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(second.next().await, Some(Resource::success(Some(1))));
        assert_eq!(fixture.fetch.calls(), 0);
    }

    // --- S2: a stale entry is refreshed from the origin ---

    #[tokio::test]
    async fn stale_entry_is_refreshed() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_millis(100));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(500)).await.unwrap();

        let mut subscription = fixture.family.subscribe(&key, false).await.unwrap();
        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(2))));

        assert_eq!(fixture.fetch.calls(), 1);
        let entry = fixture.storage.get_or_null(&key).await.unwrap().unwrap();
        assert_eq!(entry.value, 2);
        assert_eq!(entry.store_time, 1_000, "the refresh stamps the current time");
    }

    // --- S3: an origin failure preserves the cached value ---

    #[tokio::test]
    async fn origin_failure_preserves_the_cache() {
        let fixture = make_fixture(1_000, ScriptedFetch::failing(), Duration::from_millis(100));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(500)).await.unwrap();

        let mut subscription = fixture.family.subscribe(&key, false).await.unwrap();
        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));

        let failed = subscription.next().await.unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.data(), Some(&1), "the stale value stays visible");
        assert_eq!(failed.message(), Some("origin unavailable"));

        let entry = fixture.storage.get_or_null(&key).await.unwrap().unwrap();
        assert_eq!(entry.value, 1);
        assert_eq!(entry.store_time, 500, "a failed refresh must not touch storage");
    }

    // --- S4: concurrent subscribers share one origin call ---

    #[tokio::test]
    async fn concurrent_subscribers_share_one_fetch() {
        let fixture = make_fixture(
            0,
            ScriptedFetch::slow(9, Duration::from_millis(50)),
            Duration::from_millis(100),
        );
        let key = "k".to_string();

        let mut first = fixture.family.subscribe(&key, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut second = fixture.family.subscribe(&key, false).await.unwrap();

        assert_eq!(first.next().await, Some(Resource::loading(None)));
        assert_eq!(first.next().await, Some(Resource::success(Some(9))));
        assert_eq!(second.next().await, Some(Resource::loading(None)));
        assert_eq!(second.next().await, Some(Resource::success(Some(9))));

        assert_eq!(fixture.fetch.calls(), 1, "demand within one epoch coalesces");
    }

    // --- Durability: a success is stored before it is observable ---

    #[tokio::test]
    async fn success_is_durable_before_notification() {
        let fixture = make_fixture(0, ScriptedFetch::value(7), Duration::from_millis(100));
        let key = "k".to_string();

        let mut subscription = fixture.family.subscribe(&key, false).await.unwrap();
        loop {
            let resource = subscription.next().await.unwrap();
            if let Resource::Success { data } = &resource {
                let stored = fixture.storage.get_or_null(&key).await.unwrap().unwrap();
                assert_eq!(Some(&stored.value), data.as_ref());
                break;
            }
        }
    }

    // --- Explicit writes are observable; duplicates collapse per subscriber ---

    #[tokio::test]
    async fn writes_are_observable_and_deduplicated() {
        let clock = Arc::new(ManualClock::new(0));
        let family: ResourceCache<String, i32> = ResourceCache::in_memory(
            "writes",
            CacheOptions {
                clock: clock.clone() as Arc<dyn ClockSource>,
                ..CacheOptions::default()
            },
        );
        let key = "k".to_string();

        let mut subscription = family.subscribe(&key, false).await.unwrap();
        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, Some(Resource::success(None)));

        family.put_value(&key, 5).await.unwrap();
        family.put_value(&key, 5).await.unwrap(); // re-emitted, then deduplicated
        family.put_value(&key, 6).await.unwrap();

        assert_eq!(subscription.next().await, Some(Resource::success(Some(5))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(6))));
    }

    // --- Staleness is clock-driven, not subscription-driven ---

    #[tokio::test]
    async fn advancing_the_clock_turns_a_hit_into_a_refresh() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_millis(100));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(1_000)).await.unwrap();

        let hit = fixture.family.get(&key, false, false).await.unwrap();
        assert_eq!(hit, Resource::success(Some(1)));
        assert_eq!(fixture.fetch.calls(), 0);

        fixture.clock.advance(101);

        let refreshed = fixture.family.get(&key, false, false).await.unwrap();
        assert_eq!(refreshed, Resource::success(Some(2)));
        assert_eq!(fixture.fetch.calls(), 1);
    }

    // --- Invalidation marks the entry stale and forces the next load ---

    #[tokio::test]
    async fn invalidate_marks_stale_and_the_next_get_refetches() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_secs(3600));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(1_000)).await.unwrap();

        assert_eq!(
            fixture.family.get(&key, false, false).await.unwrap(),
            Resource::success(Some(1))
        );
        assert_eq!(fixture.fetch.calls(), 0);

        fixture.family.invalidate(&key, false, false).await.unwrap();

        let entry = fixture.storage.get_or_null(&key).await.unwrap().unwrap();
        assert_eq!(entry.store_time, 0);
        assert_eq!(entry.value, 1);

        assert_eq!(
            fixture.family.get(&key, false, false).await.unwrap(),
            Resource::success(Some(2))
        );
        assert_eq!(fixture.fetch.calls(), 1);
    }

    // --- Forced invalidation waits for the reload when someone listens ---

    #[tokio::test]
    async fn forced_invalidate_awaits_the_reload() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_secs(3600));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(1_000)).await.unwrap();

        let mut subscription = fixture.family.subscribe(&key, false).await.unwrap();
        loop {
            match subscription.next().await.unwrap() {
                resource if resource.is_loading() => continue,
                resource => {
                    assert_eq!(resource, Resource::success(Some(1)));
                    break;
                }
            }
        }

        fixture.family.invalidate(&key, true, true).await.unwrap();
        assert_eq!(fixture.fetch.calls(), 1, "the forced reload already ran");

        // The listener observed the reload: loading with the old value,
        // then the refreshed success.
        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(2))));
    }

    // --- Without subscribers a forced invalidation only marks stale ---

    #[tokio::test]
    async fn forced_invalidate_without_subscribers_skips_the_reload() {
        let fixture = make_fixture(1_000, ScriptedFetch::value(2), Duration::from_secs(3600));
        let key = "k".to_string();
        fixture.storage.put(&key, 1, Some(1_000)).await.unwrap();

        fixture.family.invalidate(&key, true, false).await.unwrap();

        assert_eq!(fixture.fetch.calls(), 0, "nobody is listening");
        let entry = fixture.storage.get_or_null(&key).await.unwrap().unwrap();
        assert_eq!(entry.store_time, 0);
    }
}
