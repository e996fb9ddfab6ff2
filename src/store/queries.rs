use crate::model::*;

use super::rules::validate_doc_id;
use super::{Engine, StoreError};

impl Engine {
    pub async fn get_document(&self, doc_id: &str) -> Result<Option<Booking>, StoreError> {
        self.ensure_online()?;
        validate_doc_id(doc_id)?;
        let slot = match self.documents.get(doc_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        let guard = slot.read().await;
        Ok(guard.booking.clone())
    }

    /// Every document ever written into `key`, with its current version.
    /// Documents that were deleted come back as tombstones (`booking: None`)
    /// so a watcher can tell a stale change from a fresh one.
    pub async fn query(&self, key: &PartitionKey) -> Result<Vec<VersionedDocument>, StoreError> {
        self.ensure_online()?;
        let ids: Vec<DocId> = self
            .partitions
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            let slot = match self.documents.get(&id) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };
            let guard = slot.read().await;
            let booking = guard
                .booking
                .as_ref()
                .filter(|b| b.date == key.date && b.room == key.room)
                .cloned();
            docs.push(VersionedDocument {
                id,
                version: guard.version,
                booking,
            });
        }
        Ok(docs)
    }

    /// Live bookings in one partition, sorted by id.
    pub async fn list_bookings(&self, key: &PartitionKey) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .query(key)
            .await?
            .into_iter()
            .filter_map(|d| d.booking)
            .collect();
        bookings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bookings)
    }

    /// `(version, booking)` for every live document in the store.
    pub(super) async fn live_slots(&self) -> Vec<(u64, Booking)> {
        let slots: Vec<_> = self.documents.iter().map(|e| e.value().clone()).collect();
        let mut live = Vec::new();
        for slot in slots {
            let guard = slot.read().await;
            if let Some(booking) = &guard.booking {
                live.push((guard.version, booking.clone()));
            }
        }
        live
    }

    /// Every live booking in the store, sorted by id.
    pub async fn live_documents(&self) -> Vec<Booking> {
        let mut docs: Vec<Booking> = self.live_slots().await.into_iter().map(|(_, b)| b).collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }
}
