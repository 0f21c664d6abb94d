//! Process-wide configuration resolving storage factories at family
//! construction time.
//!
//! Applications register their persistent and secure factories once during
//! startup; constructing a persistent or secure family before that fails
//! with [`CacheError::ConfigurationMissing`] naming the absent factory. The
//! in-memory factory has a built-in default and only needs registration to
//! be replaced.

use std::sync::Arc;

use parking_lot::RwLock;

use wellspring_core::CacheError;

use crate::storage::{MemoryRawStorageFactory, RawStorageFactory};

static PERSISTENT_FACTORY: FactorySlot = FactorySlot::new("persistent");
static SECURE_FACTORY: FactorySlot = FactorySlot::new("secure");
static IN_MEMORY_FACTORY: FactorySlot = FactorySlot::new("in-memory");

/// One registration slot for a storage factory.
struct FactorySlot {
    kind: &'static str,
    factory: RwLock<Option<Arc<dyn RawStorageFactory>>>,
}

impl FactorySlot {
    const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factory: RwLock::new(None),
        }
    }

    fn set(&self, factory: Arc<dyn RawStorageFactory>) {
        *self.factory.write() = Some(factory);
    }

    fn get(&self, family: &str) -> Result<Arc<dyn RawStorageFactory>, CacheError> {
        self.factory
            .read()
            .clone()
            .ok_or_else(|| CacheError::ConfigurationMissing {
                kind: self.kind,
                family: family.to_string(),
            })
    }
}

/// Registers the factory backing persistent families.
pub fn set_persistent_storage_factory(factory: Arc<dyn RawStorageFactory>) {
    tracing::debug!("registered persistent storage factory");
    PERSISTENT_FACTORY.set(factory);
}

/// Registers the factory backing secure families.
pub fn set_secure_storage_factory(factory: Arc<dyn RawStorageFactory>) {
    tracing::debug!("registered secure storage factory");
    SECURE_FACTORY.set(factory);
}

/// Replaces the built-in in-memory factory.
pub fn set_in_memory_storage_factory(factory: Arc<dyn RawStorageFactory>) {
    tracing::debug!("registered in-memory storage factory");
    IN_MEMORY_FACTORY.set(factory);
}

pub(crate) fn persistent_factory(family: &str) -> Result<Arc<dyn RawStorageFactory>, CacheError> {
    PERSISTENT_FACTORY.get(family)
}

pub(crate) fn secure_factory(family: &str) -> Result<Arc<dyn RawStorageFactory>, CacheError> {
    SECURE_FACTORY.get(family)
}

pub(crate) fn in_memory_factory() -> Arc<dyn RawStorageFactory> {
    if let Some(factory) = IN_MEMORY_FACTORY.factory.read().clone() {
        return factory;
    }
    let mut slot = IN_MEMORY_FACTORY.factory.write();
    slot.get_or_insert_with(|| Arc::new(MemoryRawStorageFactory::new()))
        .clone()
}
