//! Crate-wide error taxonomy with stable numeric codes for wire compatibility.

use std::fmt;

/// Stable, wire-compatible error discriminants.
///
/// Values match `ResultMessageErrorCode` from the original implementation
/// wherever a wire counterpart exists. `DelayOutOfRange` has no original
/// wire discriminant; it is assigned an out-of-band value for internal use
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0,
    InvalidMessageStructure = 1,
    AlreadyDone = 2,
    NotLoggedIn = 10,
    QueueIdNotFound = 20,
    UnknownAction = 21,
    InvalidHash = 22,
    InvalidQueueIndex = 23,
    InvalidQueueItemType = 24,
    InvalidTimeSpan = 25,
    MaximumQueueSizeExceeded = 50,
    OperationAlreadyRunning = 51,
    DelayOutOfRange = 52,
    DatabaseProblem = 90,
    ServerTooOld = 240,
    ExtensionNotSupported = 241,
    NonFatalInternalServerError = 254,
    UnknownError = 255,
}

impl ErrorCode {
    pub fn succeeded(self) -> bool {
        matches!(self, ErrorCode::NoError | ErrorCode::AlreadyDone)
    }
}

/// Crate-wide error type. Carries a stable [`ErrorCode`] plus an optional
/// human-readable detail for logs.
#[derive(Debug, Clone)]
pub struct PmpError {
    pub code: ErrorCode,
    pub detail: String,
}

impl PmpError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn hash_is_null() -> Self {
        Self::new(ErrorCode::InvalidHash, "hash is null")
    }

    pub fn hash_is_unknown() -> Self {
        Self::new(ErrorCode::InvalidHash, "hash is unknown to the library")
    }

    pub fn queue_id_not_found(id: u32) -> Self {
        Self::new(ErrorCode::QueueIdNotFound, format!("queue id {id} not found"))
    }

    pub fn queue_index_out_of_range(index: i64, len: usize) -> Self {
        Self::new(
            ErrorCode::InvalidQueueIndex,
            format!("index {index} out of range for queue of length {len}"),
        )
    }

    pub fn invalid_queue_item_type(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQueueItemType, detail.into())
    }

    pub fn max_queue_size_exceeded() -> Self {
        Self::new(ErrorCode::MaximumQueueSizeExceeded, "queue is at its maximum size")
    }

    pub fn operation_already_running(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationAlreadyRunning, detail.into())
    }

    pub fn delay_out_of_range() -> Self {
        Self::new(ErrorCode::DelayOutOfRange, "delay must be greater than zero")
    }

    pub fn database_problem(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseProblem, detail.into())
    }

    pub fn not_logged_in() -> Self {
        Self::new(ErrorCode::NotLoggedIn, "not logged in")
    }

    pub fn unknown_action(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownAction, detail.into())
    }
}

impl fmt::Display for PmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code as u8, self.detail)
    }
}

impl std::error::Error for PmpError {}

pub type PmpResult<T> = Result<T, PmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_error_and_already_done_succeed() {
        assert!(ErrorCode::NoError.succeeded());
        assert!(ErrorCode::AlreadyDone.succeeded());
        assert!(!ErrorCode::UnknownError.succeeded());
    }

    #[test]
    fn hash_variants_share_wire_discriminant() {
        let null_err = PmpError::hash_is_null();
        let unknown_err = PmpError::hash_is_unknown();
        assert_eq!(null_err.code as u8, ErrorCode::InvalidHash as u8);
        assert_eq!(unknown_err.code as u8, ErrorCode::InvalidHash as u8);
    }

    #[test]
    fn display_includes_numeric_code() {
        let err = PmpError::queue_id_not_found(42);
        let rendered = err.to_string();
        assert!(rendered.contains("20"));
        assert!(rendered.contains("42"));
    }
}
