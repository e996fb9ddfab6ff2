use thiserror::Error;

use crate::model::DocId;
use crate::store::{ErrorCode, StoreError};

/// Everything a booking operation can report back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    /// Bad or missing input, caught before any store call.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    /// Someone else holds the slot.
    #[error("this slot has just been booked by someone else ({id})")]
    SlotConflict { id: DocId },
    /// The store could not be reached or could not commit; the user may retry.
    #[error("booking service unavailable: {0}")]
    StoreUnavailable(String),
    /// Cancel by a non-owner, or any other write the access rules refused.
    #[error("not allowed: {0}")]
    Unauthorized(String),
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl BookingError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        BookingError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation { .. } => "validation",
            BookingError::SlotConflict { .. } => "slot_conflict",
            BookingError::StoreUnavailable(_) => "store_unavailable",
            BookingError::Unauthorized(_) => "unauthorized",
            BookingError::Unknown(_) => "unknown",
        }
    }

    /// Whether the same request may succeed if simply tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::StoreUnavailable(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e.code {
            ErrorCode::Unavailable | ErrorCode::FailedPrecondition | ErrorCode::Aborted => {
                BookingError::StoreUnavailable(e.message)
            }
            ErrorCode::PermissionDenied => BookingError::Unauthorized(e.message),
            ErrorCode::InvalidArgument => BookingError::validation("booking", e.message),
            ErrorCode::NotFound
            | ErrorCode::Cancelled
            | ErrorCode::Internal => BookingError::Unknown(e.to_string()),
        }
    }
}

/// Count and log a failed client operation.
pub(crate) fn record_failure(op: &'static str, err: &BookingError) {
    metrics::counter!(
        crate::observability::BOOKING_ERRORS_TOTAL,
        "op" => op,
        "kind" => err.kind()
    )
    .increment(1);
    match err {
        BookingError::Unknown(msg) => tracing::error!("{op} failed: {msg}"),
        BookingError::StoreUnavailable(_) => tracing::warn!("{op} failed: {err}"),
        _ => tracing::debug!("{op} rejected: {err}"),
    }
}
