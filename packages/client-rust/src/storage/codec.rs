//! Serde adapter from [`RawStorage`] to the typed [`StorageBackend`].

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use wellspring_core::{ClockSource, StorageEntry};

use super::backend::StorageBackend;
use super::raw::RawStorage;

/// Decodes a stored JSON value into the typed value.
///
/// The default hook is plain deserialization; it fails loudly on a shape
/// mismatch rather than handing back a half-decoded value.
pub type DecodeFn<V> = Arc<dyn Fn(serde_json::Value) -> anyhow::Result<V> + Send + Sync>;

/// Typed view over a [`RawStorage`].
///
/// Keys and values are serde-encoded to JSON on the way in; on the way out
/// the decode hook turns stored JSON back into `V`. Decode failures are
/// logged at error level and surfaced to the caller.
pub struct CodecStorage<K, V> {
    raw: Arc<dyn RawStorage>,
    clock: Arc<dyn ClockSource>,
    decode: DecodeFn<V>,
    _key: PhantomData<fn(K)>,
}

impl<K, V> CodecStorage<K, V>
where
    V: DeserializeOwned + 'static,
{
    /// Creates a typed view with the default serde decode hook.
    #[must_use]
    pub fn new(raw: Arc<dyn RawStorage>, clock: Arc<dyn ClockSource>) -> Self {
        Self::with_decode(
            raw,
            clock,
            Arc::new(|value| serde_json::from_value(value).map_err(Into::into)),
        )
    }
}

impl<K, V> CodecStorage<K, V> {
    /// Creates a typed view with a custom decode hook.
    #[must_use]
    pub fn with_decode(
        raw: Arc<dyn RawStorage>,
        clock: Arc<dyn ClockSource>,
        decode: DecodeFn<V>,
    ) -> Self {
        Self {
            raw,
            clock,
            decode,
            _key: PhantomData,
        }
    }
}

impl<K: Serialize, V> CodecStorage<K, V> {
    fn encode_key(&self, key: &K) -> anyhow::Result<String> {
        serde_json::to_string(key).map_err(Into::into)
    }
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for CodecStorage<K, V>
where
    K: Serialize + Send + Sync,
    V: Serialize + Send + Sync,
{
    async fn get_or_null(&self, key: &K) -> anyhow::Result<Option<StorageEntry<V>>> {
        let raw_key = self.encode_key(key)?;
        let Some(entry) = self.raw.get(&raw_key).await? else {
            return Ok(None);
        };
        match (self.decode)(entry.value) {
            Ok(value) => Ok(Some(StorageEntry::new(value, entry.store_time))),
            Err(err) => {
                tracing::error!(key = %raw_key, error = %err, "failed to decode stored value");
                Err(err)
            }
        }
    }

    async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> anyhow::Result<()> {
        let raw_key = self.encode_key(key)?;
        let encoded = serde_json::to_value(&value)?;
        let store_time = store_time.unwrap_or_else(|| self.clock.now_millis());
        self.raw.put(&raw_key, encoded, store_time).await
    }

    async fn remove(&self, key: &K) -> anyhow::Result<()> {
        let raw_key = self.encode_key(key)?;
        self.raw.remove(&raw_key).await
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.raw.clear().await
    }
}
