//! Coordination layer: per-key state machines and the family registry.

mod family;
mod key;
mod subscription;

pub use family::{CacheOptions, ResourceCache};
pub use key::KeyCache;
pub use subscription::ResourceSubscription;
