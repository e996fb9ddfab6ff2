mod error;
mod queries;
mod rules;
mod transaction;

pub use error::{ErrorCode, StoreError};
pub use transaction::Transaction;

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::notify::{NotifyHub, Watch, WatchEvent};
use crate::wal::Wal;

use rules::now_ms;

pub type SharedDocument = Arc<RwLock<DocumentSlot>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the
    // next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by wal_writer_loop"),
    }
}

/// Embedded document store for the booking collection.
///
/// Every document lives in its own `Arc<RwLock<DocumentSlot>>`; a commit holds
/// the slot's write lock across WAL append, apply and notify, so commits to one
/// document are serialized and version checks are exact. Partitions
/// (`date`, `room`) index which documents a filtered query must look at.
pub struct Engine {
    /// Deleted documents stay as tombstones for the life of the process, and
    /// compaction only drops them from the log. A re-created document must
    /// get a version above any tombstone a watcher has already seen. One
    /// entry per distinct (date, room, slot) ever booked.
    pub(super) documents: DashMap<DocId, SharedDocument>,
    /// Partition → every document id ever written into it (tombstones included).
    pub(super) partitions: DashMap<PartitionKey, BTreeSet<DocId>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    online: AtomicBool,
    /// Last server timestamp handed out.
    clock: AtomicI64,
    /// Commits hold this shared; compaction takes it exclusively so no commit
    /// can land in the WAL being replaced.
    commit_gate: RwLock<()>,
}

/// Apply an event to a document slot (caller holds the slot's write lock).
fn apply_to_document(
    slot: &mut DocumentSlot,
    event: &Event,
    partitions: &DashMap<PartitionKey, BTreeSet<DocId>>,
) {
    match event {
        Event::DocumentWritten {
            id,
            version,
            booking,
        } => {
            slot.version = *version;
            slot.booking = Some(booking.clone());
            partitions
                .entry(booking.partition())
                .or_default()
                .insert(id.clone());
        }
        Event::DocumentDeleted { version, .. } => {
            slot.version = *version;
            slot.booking = None;
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let partitions = DashMap::new();
        let mut slots: HashMap<DocId, DocumentSlot> = HashMap::new();
        let mut latest_ts = 0;
        for event in &events {
            if let Event::DocumentWritten { booking, .. } = event {
                latest_ts = latest_ts.max(booking.created_at);
            }
            let slot = slots.entry(event.doc_id().to_string()).or_default();
            apply_to_document(slot, event, &partitions);
        }

        let documents = DashMap::with_capacity(slots.len());
        for (id, slot) in slots {
            documents.insert(id, Arc::new(RwLock::new(slot)));
        }
        if !events.is_empty() {
            info!(
                "replayed {} WAL entries into {} documents",
                events.len(),
                documents.len()
            );
        }

        Ok(Self {
            documents,
            partitions,
            wal_tx,
            notify,
            online: AtomicBool::new(true),
            clock: AtomicI64::new(latest_ts),
            commit_gate: RwLock::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::wal("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::wal("WAL writer dropped response"))?
            .map_err(StoreError::wal)
    }

    /// Shared hold on the commit gate. Take it before any slot write lock.
    pub(super) async fn enter_commit(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// WAL-append + apply + notify in one call. Caller holds the commit gate
    /// and the slot's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut DocumentSlot,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_document(slot, event, &self.partitions);
        self.notify
            .send(&event.partition(), WatchEvent::Change(event.clone()));
        Ok(())
    }

    /// Existing slot, or a fresh version-0 slot registered under `id`.
    pub(super) fn document_slot(&self, id: &str) -> SharedDocument {
        if let Some(slot) = self.documents.get(id) {
            return slot.value().clone();
        }
        self.documents.entry(id.to_string()).or_default().value().clone()
    }

    /// Commit-time clock: wall time, but never behind a previously issued stamp.
    pub(super) fn server_timestamp(&self) -> Ms {
        let now = now_ms();
        let prev = self.clock.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }

    pub(super) fn ensure_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable())
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Simulate losing or regaining connectivity. Going offline pushes a
    /// transient `unavailable` error to every watch; coming back pushes a resync.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }
        if online {
            info!("store back online");
            self.notify.broadcast_all(WatchEvent::Resync);
        } else {
            info!("store offline");
            self.notify
                .broadcast_all(WatchEvent::Error(StoreError::unavailable()));
        }
    }

    /// Terminate every open watch with `err`.
    pub fn fail_watches(&self, err: StoreError) {
        tracing::warn!("failing all watches: {err}");
        self.notify.broadcast_all(WatchEvent::Error(err));
    }

    /// Register a live watch on one partition.
    pub fn watch(&self, key: PartitionKey) -> Watch {
        self.notify.subscribe(key)
    }

    /// Compact the WAL down to one write per live document. In-memory
    /// tombstones are kept.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;
        let events: Vec<Event> = self
            .live_slots()
            .await
            .into_iter()
            .map(|(version, booking)| Event::DocumentWritten {
                id: booking.id.clone(),
                version,
                booking,
            })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::wal("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::wal("WAL writer dropped response"))?
            .map_err(StoreError::wal)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
