//! Pagination value types shared by the offset and size strategies.

use serde::{Deserialize, Serialize};

/// Aggregated pagination value cached for a key: every item loaded so far
/// plus exhaustion and cursor metadata.
///
/// Built by the first-page load, then replaced atomically on every
/// subsequent page merge. The offset strategy never uses `next_page`; the
/// size strategy derives `loaded_all` from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageBundle<V, M = ()> {
    /// All items loaded so far, in origin order.
    pub items: Vec<V>,
    /// Whether the origin has no further pages.
    #[serde(rename = "loadedAll")]
    pub loaded_all: bool,
    /// Next page to request, 1-based (size strategy only).
    #[serde(rename = "nextPage", skip_serializing_if = "Option::is_none", default)]
    pub next_page: Option<u32>,
    /// Strategy- or user-defined metadata, e.g. a server-reported total.
    #[serde(skip_serializing_if = "Option::is_none", default = "Option::default")]
    pub meta: Option<M>,
}

impl<V, M> PageBundle<V, M> {
    /// Creates a bundle with every field explicit.
    #[must_use]
    pub fn new(items: Vec<V>, loaded_all: bool, next_page: Option<u32>, meta: Option<M>) -> Self {
        Self {
            items,
            loaded_all,
            next_page,
            meta,
        }
    }

    /// Number of items loaded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items have been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One page as returned by a size-mode origin call.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse<V, M = ()> {
    /// The page's items, in origin order.
    pub items: Vec<V>,
    /// Origin-supplied metadata for this page, if any.
    pub meta: Option<M>,
}

impl<V, M> PageResponse<V, M> {
    /// Creates a response without metadata.
    #[must_use]
    pub fn new(items: Vec<V>) -> Self {
        Self { items, meta: None }
    }

    /// Creates a response with metadata.
    #[must_use]
    pub fn with_meta(items: Vec<V>, meta: M) -> Self {
        Self {
            items,
            meta: Some(meta),
        }
    }
}

/// Extension point for building bundles with custom meta handling.
///
/// The default factory builds the plain bundle; implement this to swap in a
/// value-typed bundle, e.g. one whose meta carries a running total.
pub trait PageBundleFactory<V, M>: Send + Sync {
    /// Builds the bundle stored after a page merge.
    fn create(
        &self,
        items: Vec<V>,
        loaded_all: bool,
        next_page: Option<u32>,
        meta: Option<M>,
    ) -> PageBundle<V, M>;
}

/// Factory building the plain [`PageBundle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPageBundleFactory;

impl<V, M> PageBundleFactory<V, M> for DefaultPageBundleFactory {
    fn create(
        &self,
        items: Vec<V>,
        loaded_all: bool,
        next_page: Option<u32>,
        meta: Option<M>,
    ) -> PageBundle<V, M> {
        PageBundle::new(items, loaded_all, next_page, meta)
    }
}
