//! Change notifications for the key-value store.
//!
//! Every write that actually changes a value publishes the per-key diff to
//! all live subscriptions, whichever component performed the write.

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 64;

/// Diff for a single key. `None` means the key was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Key that changed
    pub key: String,
    /// Value before the write
    pub old_value: Option<Value>,
    /// Value after the write
    pub new_value: Option<Value>,
}

impl StoreChange {
    /// Build a change, or `None` when old and new are equal.
    #[must_use]
    pub fn between(key: &str, old_value: Option<Value>, new_value: Option<Value>) -> Option<Self> {
        (old_value != new_value).then(|| Self {
            key: key.to_string(),
            old_value,
            new_value,
        })
    }
}

/// All key diffs produced by one store operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreChanges {
    /// Per-key diffs
    pub changes: Vec<StoreChange>,
}

impl StoreChanges {
    /// Diff for `key`, if this batch touched it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StoreChange> {
        self.changes.iter().find(|c| c.key == key)
    }

    /// Whether this batch touched `key`.
    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether no key changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Fan-out of store changes to subscribers.
#[derive(Debug, Clone)]
pub(crate) struct ChangeNotifier {
    sender: broadcast::Sender<StoreChanges>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            cancel: CancellationToken::new(),
        }
    }

    /// Publish a batch. Empty batches and batches with no listeners are dropped.
    pub(crate) fn publish(&self, changes: StoreChanges) {
        if changes.is_empty() {
            return;
        }
        // Err only means nobody is listening.
        let _ = self.sender.send(changes);
    }
}

/// A live change subscription.
///
/// `recv` yields batches until the subscription is cancelled or the store is
/// dropped. Cancelling is possible from elsewhere via a [`SubscriptionHandle`].
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<StoreChanges>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wait for the next batch of changes.
    ///
    /// Returns `None` once cancelled or when the store is gone.
    pub async fn recv(&mut self) -> Option<StoreChanges> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                message = self.receiver.recv() => match message {
                    Ok(changes) => return Some(changes),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store subscriber lagged, changes dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// A cloneable handle that can cancel this subscription.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.cancel.clone())
    }

    /// Stop receiving changes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Cancels a [`Subscription`] from another task.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle(CancellationToken);

impl SubscriptionHandle {
    /// Cancel the subscription this handle belongs to.
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_between_equal_values_is_none() {
        assert!(StoreChange::between("k", Some(json!(1)), Some(json!(1))).is_none());
        assert!(StoreChange::between("k", None, None).is_none());
        let change = StoreChange::between("k", None, Some(json!([1]))).expect("changed");
        assert_eq!(change.key, "k");
        assert_eq!(change.old_value, None);
    }

    #[tokio::test]
    async fn test_subscription_receives_published_batch() {
        let notifier = ChangeNotifier::new();
        let mut subscription = notifier.subscribe();

        notifier.publish(StoreChanges::default());
        notifier.publish(StoreChanges {
            changes: vec![StoreChange::between("ids", None, Some(json!(["a"]))).expect("diff")],
        });

        let batch = subscription.recv().await.expect("receive batch");
        assert!(batch.touches("ids"));
        assert!(!batch.touches("exportedIds"));
    }

    #[tokio::test]
    async fn test_cancelled_subscription_returns_none() {
        let notifier = ChangeNotifier::new();
        let mut subscription = notifier.subscribe();
        let handle = subscription.handle();

        handle.cancel();
        notifier.publish(StoreChanges {
            changes: vec![StoreChange::between("ids", None, Some(json!([]))).expect("diff")],
        });

        assert!(subscription.is_cancelled());
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_channel_returns_none() {
        let notifier = ChangeNotifier::new();
        let mut subscription = notifier.subscribe();
        drop(notifier);
        assert_eq!(subscription.recv().await, None);
    }
}
