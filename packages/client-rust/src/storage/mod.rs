//! Storage layer: the typed backend trait, the type-erased JSON-shaped
//! backend interface, and the built-in in-memory implementations.
//!
//! Three layers, outermost first:
//! - [`StorageBackend`]: the typed key-to-entry store the coordinators use.
//! - [`CodecStorage`]: serde adapter turning a [`RawStorage`] into a typed
//!   backend.
//! - [`RawStorage`] / [`RawStorageFactory`]: the integration surface for
//!   external persistence (on-disk files, secret stores).

mod backend;
mod codec;
mod memory;
mod raw;

pub use backend::StorageBackend;
pub use codec::{CodecStorage, DecodeFn};
pub use memory::MemoryBackend;
pub use raw::{MemoryRawStorage, MemoryRawStorageFactory, RawEntry, RawStorage, RawStorageFactory};
