use thiserror::Error;

/// Canonical store status codes, named after the codes real-time document
/// databases report to their clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Store unreachable (offline, shutting down).
    Unavailable,
    /// Operation rejected because the store is not in a state to run it yet.
    FailedPrecondition,
    /// Transaction lost a race with a concurrent commit.
    Aborted,
    /// Access rules denied the write.
    PermissionDenied,
    NotFound,
    InvalidArgument,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::Aborted => "aborted",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::NotFound => "not-found",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(ErrorCode::Unavailable, "store is offline")
    }

    pub fn aborted(doc_id: &str) -> Self {
        Self::new(
            ErrorCode::Aborted,
            format!("document {doc_id} changed since it was read"),
        )
    }

    pub fn permission_denied(reason: &str) -> Self {
        Self::new(ErrorCode::PermissionDenied, reason)
    }

    pub fn invalid_argument(reason: &str) -> Self {
        Self::new(ErrorCode::InvalidArgument, reason)
    }

    pub fn wal(e: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::Internal, format!("WAL error: {e}"))
    }

    /// Connectivity-class errors that a live watch rides out silently.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Unavailable | ErrorCode::FailedPrecondition
        )
    }
}
