use crate::model::*;

use super::rules::{check_create, check_delete, validate_doc_id};
use super::{Engine, StoreError};

enum PendingWrite {
    Set(NewBooking),
    Delete,
}

/// A single-document read-check-write transaction.
///
/// `get()` records the version it observed; `commit()` re-checks that version
/// under the document's write lock and fails with `aborted` if anything was
/// committed in between. Callers re-run the whole transaction on `aborted`.
pub struct Transaction<'a> {
    engine: &'a Engine,
    doc_id: DocId,
    auth_uid: String,
    read_version: Option<u64>,
    write: Option<PendingWrite>,
}

impl Engine {
    pub fn begin_transaction(&self, doc_id: &str, auth_uid: &str) -> Result<Transaction<'_>, StoreError> {
        self.ensure_online()?;
        validate_doc_id(doc_id)?;
        Ok(Transaction {
            engine: self,
            doc_id: doc_id.to_string(),
            auth_uid: auth_uid.to_string(),
            read_version: None,
            write: None,
        })
    }

    /// Delete outside a transaction. `Ok(false)` if the document was absent.
    pub async fn delete_document(&self, doc_id: &str, auth_uid: &str) -> Result<bool, StoreError> {
        self.ensure_online()?;
        validate_doc_id(doc_id)?;
        let Some(slot) = self.documents.get(doc_id).map(|e| e.value().clone()) else {
            return Ok(false);
        };
        let _gate = self.enter_commit().await;
        let mut guard = slot.write().await;
        let Some(existing) = guard.booking.as_ref() else {
            return Ok(false);
        };
        check_delete(existing, auth_uid)?;

        let event = Event::DocumentDeleted {
            id: doc_id.to_string(),
            version: guard.version + 1,
            partition: existing.partition(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    async fn commit_transaction(&self, txn: Transaction<'_>) -> Result<Option<Booking>, StoreError> {
        let Transaction {
            doc_id,
            auth_uid,
            read_version,
            write,
            ..
        } = txn;
        let Some(write) = write else {
            return Ok(None);
        };
        self.ensure_online()?;

        let _gate = self.enter_commit().await;
        let slot = self.document_slot(&doc_id);
        let mut guard = slot.write().await;
        if let Some(expected) = read_version
            && guard.version != expected
        {
            metrics::counter!(crate::observability::TRANSACTIONS_ABORTED_TOTAL).increment(1);
            return Err(StoreError::aborted(&doc_id));
        }

        let version = guard.version + 1;
        let event = match write {
            PendingWrite::Set(new) => {
                check_create(guard.booking.as_ref(), &new, &auth_uid)?;
                let booking = new.into_booking(doc_id.clone(), self.server_timestamp());
                Event::DocumentWritten {
                    id: doc_id,
                    version,
                    booking,
                }
            }
            PendingWrite::Delete => {
                let Some(existing) = guard.booking.as_ref() else {
                    return Ok(None);
                };
                check_delete(existing, &auth_uid)?;
                Event::DocumentDeleted {
                    id: doc_id,
                    version,
                    partition: existing.partition(),
                }
            }
        };

        self.persist_and_apply(&mut guard, &event).await?;
        Ok(match event {
            Event::DocumentWritten { booking, .. } => Some(booking),
            Event::DocumentDeleted { .. } => None,
        })
    }
}

impl Transaction<'_> {
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Read the document, pinning the version the commit will be checked against.
    pub async fn get(&mut self) -> Result<Option<Booking>, StoreError> {
        self.engine.ensure_online()?;
        let slot = self
            .engine
            .documents
            .get(&self.doc_id)
            .map(|e| e.value().clone());
        let (version, booking) = match slot {
            Some(slot) => {
                let guard = slot.read().await;
                (guard.version, guard.booking.clone())
            }
            None => (0, None),
        };
        if self.read_version.is_none() {
            self.read_version = Some(version);
        }
        Ok(booking)
    }

    /// Stage a write of `booking` at this transaction's document.
    pub fn set(&mut self, booking: NewBooking) {
        self.write = Some(PendingWrite::Set(booking));
    }

    pub fn delete(&mut self) {
        self.write = Some(PendingWrite::Delete);
    }

    /// Apply the staged write atomically. Returns the stored booking for a
    /// write, `None` for a delete or an empty transaction.
    pub async fn commit(self) -> Result<Option<Booking>, StoreError> {
        let engine = self.engine;
        engine.commit_transaction(self).await
    }
}
