use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::WATCH_CHANNEL_CAPACITY;
use crate::model::{Event, PartitionKey};
use crate::store::StoreError;

/// What a watcher receives on its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A committed write or delete inside the watched partition.
    Change(Event),
    /// State may have been missed; re-query the partition.
    Resync,
    /// Store-side failure. Transient codes are informational; anything else
    /// ends the watch.
    Error(StoreError),
}

/// Broadcast hub for filtered watches, one channel per partition.
pub struct NotifyHub {
    channels: DashMap<PartitionKey, broadcast::Sender<WatchEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a partition. Creates the channel if needed. The returned
    /// guard unregisters the watcher when dropped.
    pub fn subscribe(self: &Arc<Self>, key: PartitionKey) -> Watch {
        let rx = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe();
        metrics::gauge!(crate::observability::WATCHES_ACTIVE).increment(1.0);
        Watch {
            rx,
            guard: WatchGuard {
                hub: self.clone(),
                key,
            },
        }
    }

    /// Send to one partition. No-op if nobody is listening.
    pub fn send(&self, key: &PartitionKey, event: WatchEvent) {
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(event);
        }
    }

    /// Send to every open partition channel.
    pub fn broadcast_all(&self, event: WatchEvent) {
        for entry in self.channels.iter() {
            let _ = entry.value().send(event.clone());
        }
    }

    /// Drop the partition's channel once its last receiver is gone.
    fn release(&self, key: &PartitionKey) {
        self.channels
            .remove_if(key, |_, sender| sender.receiver_count() == 0);
    }

    /// Live watchers on one partition.
    pub fn watcher_count(&self, key: &PartitionKey) -> usize {
        self.channels
            .get(key)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Number of partitions with at least one channel open.
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

/// A registered watch: the receiving end plus its release guard.
/// `rx` is declared first so it drops before the guard runs `release`.
pub struct Watch {
    pub rx: broadcast::Receiver<WatchEvent>,
    pub guard: WatchGuard,
}

pub struct WatchGuard {
    hub: Arc<NotifyHub>,
    key: PartitionKey,
}

impl WatchGuard {
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.hub.release(&self.key);
        metrics::gauge!(crate::observability::WATCHES_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ErrorCode;

    fn key() -> PartitionKey {
        PartitionKey::new("2024-05-01", "E101")
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = Arc::new(NotifyHub::new());
        let mut watch = hub.subscribe(key());

        hub.send(&key(), WatchEvent::Resync);
        assert_eq!(watch.rx.recv().await.unwrap(), WatchEvent::Resync);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&key(), WatchEvent::Resync);
        assert_eq!(hub.open_channels(), 0);
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let hub = Arc::new(NotifyHub::new());
        let mut a = hub.subscribe(key());
        let mut b = hub.subscribe(PartitionKey::new("2024-05-01", "E102"));

        hub.send(&key(), WatchEvent::Resync);
        assert_eq!(a.rx.recv().await.unwrap(), WatchEvent::Resync);
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_all_reaches_every_partition() {
        let hub = Arc::new(NotifyHub::new());
        let mut a = hub.subscribe(key());
        let mut b = hub.subscribe(PartitionKey::new("2024-05-02", "F102"));

        let err = StoreError::new(ErrorCode::Unavailable, "offline");
        hub.broadcast_all(WatchEvent::Error(err.clone()));
        assert_eq!(a.rx.recv().await.unwrap(), WatchEvent::Error(err.clone()));
        assert_eq!(b.rx.recv().await.unwrap(), WatchEvent::Error(err));
    }

    #[tokio::test]
    async fn dropping_last_watch_releases_channel() {
        let hub = Arc::new(NotifyHub::new());
        let first = hub.subscribe(key());
        let second = hub.subscribe(key());
        assert_eq!(hub.watcher_count(&key()), 2);

        drop(first);
        assert_eq!(hub.watcher_count(&key()), 1);
        assert_eq!(hub.open_channels(), 1);

        drop(second);
        assert_eq!(hub.watcher_count(&key()), 0);
        assert_eq!(hub.open_channels(), 0);
    }
}
