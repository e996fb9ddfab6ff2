//! Slot conflict resolution.
//!
//! A booking's document key is a pure function of its (date, room, slot)
//! triple, so "is this slot free" becomes "does this document exist", and a
//! single-document transaction can check and claim it atomically. Two callers
//! racing for the same triple address the same document; the store lets one
//! commit and the other's re-read then finds the slot taken.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;
use crate::store::{Engine, ErrorCode};

use super::BookingError;

const ID_DELIMITER: char = '_';

/// Input of a create-booking request. Everything but `notes` is required.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookingDetails {
    pub room: String,
    pub date: String,
    pub slot: String,
    pub course_code: String,
    pub booked_by: String,
    pub notes: Option<String>,
    pub user_id: String,
}

/// Replace `/`, whitespace and `:` with `_` so the slot label is safe inside
/// a document key.
fn normalize_slot(slot: &str) -> String {
    slot.chars()
        .map(|c| {
            if c == '/' || c == ':' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Deterministic document key for a (date, room, slot) triple, e.g.
/// `2024-05-01_E101_07_00_-_09_00`.
pub fn slot_document_id(date: &str, room: &str, slot: &str) -> DocId {
    let mut id = String::with_capacity(date.len() + room.len() + slot.len() + 2);
    id.push_str(date);
    id.push(ID_DELIMITER);
    id.push_str(room);
    id.push(ID_DELIMITER);
    id.push_str(&normalize_slot(slot));
    id
}

/// `YYYY-MM-DD`, a real calendar day, zero-padded.
pub(crate) fn validate_date(date: &str) -> Result<NaiveDate, BookingError> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| BookingError::validation("date", "expected YYYY-MM-DD"))?;
    if parsed.format("%Y-%m-%d").to_string() != date {
        return Err(BookingError::validation("date", "expected YYYY-MM-DD"));
    }
    Ok(parsed)
}

fn required(field: &'static str, value: &str, max_len: usize) -> Result<String, BookingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BookingError::validation(field, "is required"));
    }
    if value.len() > max_len {
        return Err(BookingError::validation(
            field,
            format!("must be at most {max_len} bytes"),
        ));
    }
    Ok(value.to_string())
}

/// Check every field and produce the record to stage. Pure: touches no store.
pub fn validate(details: &BookingDetails, catalog: &Catalog) -> Result<NewBooking, BookingError> {
    if !catalog.contains_room(&details.room) {
        return Err(BookingError::validation("room", "unknown room"));
    }
    validate_date(&details.date)?;
    if !catalog.contains_slot(&details.slot) {
        return Err(BookingError::validation("slot", "unknown time slot"));
    }
    let course_code = required("courseCode", &details.course_code, MAX_COURSE_CODE_LEN)?;
    let booked_by = required("bookedBy", &details.booked_by, MAX_BOOKED_BY_LEN)?;
    let user_id = required("userId", &details.user_id, MAX_USER_ID_LEN)?;
    let notes = details.notes.as_deref().unwrap_or_default().trim().to_string();
    if notes.len() > MAX_NOTES_LEN {
        return Err(BookingError::validation(
            "notes",
            format!("must be at most {MAX_NOTES_LEN} bytes"),
        ));
    }

    Ok(NewBooking {
        room: details.room.clone(),
        date: details.date.clone(),
        slot: details.slot.clone(),
        course_code,
        booked_by,
        notes,
        user_id,
    })
}

/// Claim the slot for `new`: read the derived document inside a transaction,
/// fail with `SlotConflict` if it exists, otherwise write it. A commit that
/// loses a race is re-run from the read, which then sees the winner.
pub(crate) async fn claim_slot(engine: &Engine, new: NewBooking) -> Result<Booking, BookingError> {
    let id = slot_document_id(&new.date, &new.room, &new.slot);

    for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
        let mut txn = engine.begin_transaction(&id, &new.user_id)?;
        if txn.get().await?.is_some() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(BookingError::SlotConflict { id });
        }
        txn.set(new.clone());

        match txn.commit().await {
            Ok(Some(booking)) => {
                info!("booked {} for {}", booking.id, booking.course_code);
                return Ok(booking);
            }
            Ok(None) => {
                return Err(BookingError::Unknown(format!(
                    "commit of {id} returned no document"
                )));
            }
            Err(e) if e.code == ErrorCode::Aborted => {
                debug!("transaction on {id} contended (attempt {attempt})");
                metrics::counter!(crate::observability::TRANSACTION_RETRIES_TOTAL).increment(1);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(BookingError::StoreUnavailable(format!(
        "gave up on {id} after {MAX_TRANSACTION_ATTEMPTS} contended attempts"
    )))
}
