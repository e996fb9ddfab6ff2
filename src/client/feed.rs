use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::model::*;
use crate::notify::{Watch, WatchEvent};
use crate::store::{Engine, StoreError};

use super::BookingError;

/// What a live feed yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    /// Full set of live bookings for the (date, room), sorted by id.
    Snapshot(Vec<Booking>),
    /// The feed hit a non-transient failure and has stopped.
    Degraded(BookingError),
}

/// Live view of one (date, room) partition.
///
/// Every document the feed has seen is tracked with its version, deleted ones
/// included, so a change notification older than what a re-query already
/// returned is ignored. The feed never regresses and never shows a booking
/// from another partition. Dropping it releases the underlying watch.
pub struct BookingFeed {
    engine: Arc<Engine>,
    watch: Watch,
    known: HashMap<DocId, (u64, Option<Booking>)>,
    pending: Option<FeedUpdate>,
    stopped: bool,
}

impl BookingFeed {
    /// Register the watch, then load the partition. Registering first means no
    /// commit can land between the read and the subscription unseen.
    pub(crate) async fn open(engine: Arc<Engine>, key: PartitionKey) -> Self {
        let watch = engine.watch(key);
        let mut feed = BookingFeed {
            engine,
            watch,
            known: HashMap::new(),
            pending: None,
            stopped: false,
        };
        feed.pending = feed.resync().await;
        feed
    }

    pub fn key(&self) -> &PartitionKey {
        self.watch.guard.key()
    }

    /// Live bookings as currently known, sorted by id.
    pub fn current(&self) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .known
            .values()
            .filter_map(|(_, b)| b.clone())
            .collect();
        bookings.sort_by(|a, b| a.id.cmp(&b.id));
        bookings
    }

    /// Wait for the next change. Returns `None` once the feed has stopped.
    pub async fn next(&mut self) -> Option<FeedUpdate> {
        if let Some(update) = self.pending.take() {
            return Some(update);
        }
        if self.stopped {
            return None;
        }

        loop {
            match self.watch.rx.recv().await {
                Ok(WatchEvent::Change(event)) => {
                    if self.apply(event) {
                        return Some(FeedUpdate::Snapshot(self.current()));
                    }
                }
                Ok(WatchEvent::Resync) => {
                    if let Some(update) = self.resync().await {
                        return Some(update);
                    }
                }
                Ok(WatchEvent::Error(e)) if e.is_transient() => {
                    debug!("feed {}: suppressed transient error: {e}", self.key());
                }
                Ok(WatchEvent::Error(e)) => return Some(self.degrade(e)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("feed {}: lagged by {skipped} events, resyncing", self.key());
                    if let Some(update) = self.resync().await {
                        return Some(update);
                    }
                }
                Err(RecvError::Closed) => {
                    self.stopped = true;
                    return None;
                }
            }
        }
    }

    /// Adapt the feed into a `Stream` of updates.
    pub fn into_stream(self) -> impl Stream<Item = FeedUpdate> + Send {
        futures::stream::unfold(self, |mut feed| async move {
            let update = feed.next().await?;
            Some((update, feed))
        })
    }

    /// Re-query the partition and fold the result in. `None` means the store
    /// is temporarily unreachable and the feed keeps waiting for a `Resync`.
    async fn resync(&mut self) -> Option<FeedUpdate> {
        match self.engine.query(self.watch.guard.key()).await {
            Ok(docs) => {
                for doc in docs {
                    self.record(doc.id, doc.version, doc.booking);
                }
                metrics::counter!(crate::observability::FEED_RESYNCS_TOTAL).increment(1);
                Some(FeedUpdate::Snapshot(self.current()))
            }
            Err(e) if e.is_transient() => {
                debug!("feed {}: store unreachable, waiting: {e}", self.key());
                None
            }
            Err(e) => Some(self.degrade(e)),
        }
    }

    fn degrade(&mut self, e: StoreError) -> FeedUpdate {
        warn!("feed {} stopped: {e}", self.key());
        self.stopped = true;
        FeedUpdate::Degraded(e.into())
    }

    /// Fold one change in. Returns whether the visible set changed.
    fn apply(&mut self, event: Event) -> bool {
        if event.partition() != *self.key() {
            return false;
        }
        let version = event.version();
        match event {
            Event::DocumentWritten { id, booking, .. } => self.record(id, version, Some(booking)),
            Event::DocumentDeleted { id, .. } => self.record(id, version, None),
        }
    }

    fn record(&mut self, id: DocId, version: u64, booking: Option<Booking>) -> bool {
        let booking = booking.filter(|b| b.partition() == *self.key());
        match self.known.get(&id) {
            Some((known, _)) if *known >= version => false,
            Some((_, previous)) => {
                let changed = *previous != booking;
                self.known.insert(id, (version, booking));
                changed
            }
            None => {
                let changed = booking.is_some();
                self.known.insert(id, (version, booking));
                changed
            }
        }
    }
}
