//! Per-subscriber stream view over a key's event bus.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::broadcast;

use wellspring_core::Resource;

/// One observer's view of a key's resource stream.
///
/// Yields a synthetic initial `Loading` carrying the last emitted value,
/// then live bus emissions with consecutive duplicates suppressed.
/// [`next`](ResourceSubscription::next) returns `None` once the coordinator
/// is closed and the buffered backlog is drained.
pub struct ResourceSubscription<V> {
    initial: Option<Resource<V>>,
    receiver: broadcast::Receiver<Resource<V>>,
    previous: Option<Resource<V>>,
    /// Keeps the coordinator alive while detached from its registry; the
    /// stream then stays open until the coordinator is explicitly closed.
    _coordinator: Option<Arc<dyn Any + Send + Sync>>,
}

impl<V: Clone + PartialEq> ResourceSubscription<V> {
    pub(crate) fn new(
        initial: Resource<V>,
        receiver: broadcast::Receiver<Resource<V>>,
        coordinator: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            initial: Some(initial),
            receiver,
            previous: None,
            _coordinator: coordinator,
        }
    }

    /// Next distinct resource, or `None` when the bus is closed.
    pub async fn next(&mut self) -> Option<Resource<V>> {
        if let Some(initial) = self.initial.take() {
            self.previous = Some(initial.clone());
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(resource) => {
                    if self.previous.as_ref() == Some(&resource) {
                        // Consecutive duplicate for this subscriber.
                        continue;
                    }
                    self.previous = Some(resource.clone());
                    return Some(resource);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind the resource bus");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// First resource satisfying the settle predicate: a non-loading state,
    /// or a loading state carrying data when `allow_loading` is set.
    pub(crate) async fn first_settled(&mut self, allow_loading: bool) -> Option<Resource<V>> {
        while let Some(resource) = self.next().await {
            if !resource.is_loading() || (allow_loading && resource.data().is_some()) {
                return Some(resource);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_subscription(
        initial: Resource<i32>,
    ) -> (broadcast::Sender<Resource<i32>>, ResourceSubscription<i32>) {
        let (sender, receiver) = broadcast::channel(16);
        (sender, ResourceSubscription::new(initial, receiver, None))
    }

    #[tokio::test]
    async fn initial_item_comes_first() {
        let (sender, mut subscription) = make_subscription(Resource::loading(Some(1)));
        sender.send(Resource::success(Some(2))).unwrap();

        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(2))));
    }

    #[tokio::test]
    async fn consecutive_duplicates_are_suppressed() {
        let (sender, mut subscription) = make_subscription(Resource::loading(None));

        sender.send(Resource::success(Some(1))).unwrap();
        sender.send(Resource::success(Some(1))).unwrap();
        sender.send(Resource::success(Some(2))).unwrap();
        drop(sender);

        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(2))));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn duplicate_of_the_initial_item_is_suppressed() {
        let (sender, mut subscription) = make_subscription(Resource::loading(Some(1)));

        sender.send(Resource::loading(Some(1))).unwrap();
        sender.send(Resource::success(Some(1))).unwrap();
        drop(sender);

        assert_eq!(subscription.next().await, Some(Resource::loading(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(1))));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn non_consecutive_repeats_are_delivered() {
        let (sender, mut subscription) = make_subscription(Resource::loading(None));

        sender.send(Resource::success(Some(1))).unwrap();
        sender.send(Resource::success(Some(2))).unwrap();
        sender.send(Resource::success(Some(1))).unwrap();
        drop(sender);

        subscription.next().await; // initial
        assert_eq!(subscription.next().await, Some(Resource::success(Some(1))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(2))));
        assert_eq!(subscription.next().await, Some(Resource::success(Some(1))));
    }

    #[tokio::test]
    async fn first_settled_skips_loading_states() {
        let (sender, mut subscription) = make_subscription(Resource::loading(None));

        sender.send(Resource::loading(Some(1))).unwrap();
        sender.send(Resource::success(Some(2))).unwrap();

        let settled = subscription.first_settled(false).await.unwrap();
        assert_eq!(settled, Resource::success(Some(2)));
    }

    #[tokio::test]
    async fn first_settled_accepts_loading_with_data_when_allowed() {
        let (sender, mut subscription) = make_subscription(Resource::loading(None));

        sender.send(Resource::loading(Some(1))).unwrap();

        let settled = subscription.first_settled(true).await.unwrap();
        assert_eq!(settled, Resource::loading(Some(1)));
    }

    #[tokio::test]
    async fn closed_bus_ends_the_stream() {
        let (sender, mut subscription) = make_subscription(Resource::loading(None));
        drop(sender);

        assert_eq!(subscription.next().await, Some(Resource::loading(None)));
        assert_eq!(subscription.next().await, None);
        assert!(subscription.first_settled(false).await.is_none());
    }
}
