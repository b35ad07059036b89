//! Change notifications for trident-dl
//!
//! Workers and commands push a `Notification` into every subscriber's channel
//! whenever size, transferred bytes or status change. Subscribers drain their
//! channel on their own schedule; nothing in the engine ever waits on them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::download::{Download, Snapshot};

/// Callback receiving the human-readable message of every ERROR transition
pub type ErrorReporter = Arc<dyn Fn(&Snapshot, &str) + Send + Sync>;

/// Identifies one subscription on an `ObserverHub`
pub type SubscriberId = u64;

/// "This download changed", with the fields as they were right after the change
#[derive(Clone)]
pub struct Notification {
    pub download: Download,
    pub snapshot: Snapshot,
}

/// Receiving end of a subscription
pub struct Subscription {
    id: SubscriberId,
    receiver: UnboundedReceiver<Notification>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next notification; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Next queued notification without waiting
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out shared by every download of a `Downloader`
#[derive(Default)]
pub struct ObserverHub {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriberId, UnboundedSender<Notification>)>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));
        log::debug!("Subscriber {id} added");
        Subscription { id, receiver }
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver a change to every subscriber. Never blocks.
    pub fn notify(&self, download: &Download, snapshot: Snapshot) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                let notification = Notification {
                    download: download.clone(),
                    snapshot: snapshot.clone(),
                };
                if tx.send(notification).is_err() {
                    closed.push(*id);
                }
            }
        }

        // receivers that were dropped without unsubscribing
        if !closed.is_empty() {
            self.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| !closed.contains(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::tests::detached_download;
    use crate::core::download::Status;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = ObserverHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        let download = detached_download();

        hub.notify(&download, download.snapshot());

        assert_eq!(first.recv().await.unwrap().snapshot.status, Status::Downloading);
        assert_eq!(second.recv().await.unwrap().snapshot.id, download.id());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = ObserverHub::new();
        let mut sub = hub.subscribe();
        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));

        let download = detached_download();
        hub.notify(&download, download.snapshot());
        assert!(sub.try_recv().is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let hub = ObserverHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());

        let download = detached_download();
        hub.notify(&download, download.snapshot());

        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.unsubscribe(kept.id()));
    }

    #[test]
    fn test_concurrent_subscribe_and_notify() {
        let hub = Arc::new(ObserverHub::new());
        let download = detached_download();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let hub = Arc::clone(&hub);
                let download = download.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let sub = hub.subscribe();
                        hub.notify(&download, download.snapshot());
                        hub.unsubscribe(sub.id());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
