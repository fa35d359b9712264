//! Error types for Agora
//!
//! Two layers:
//! - [`StoreError`] is what the SQLite accessors return.
//! - [`AgoraError`] is what every use case returns. The logic layer is the
//!   only place a `StoreError` turns into an `AgoraError`, so callers never
//!   see storage-internal failure types.

use hyper::StatusCode;
use rusqlite::ErrorCode;

/// Coarse classification every [`AgoraError`] collapses onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidArgument => "invalid_argument",
            Self::Internal => "internal",
        }
    }
}

/// Main error type for Agora operations
#[derive(Debug, thiserror::Error)]
pub enum AgoraError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Clock moved backwards: last issued at {last_ms}ms, now {now_ms}ms")]
    ClockMovedBackwards { last_ms: i64, now_ms: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgoraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::InvalidArgument(_) | Self::BadRequest(_) => ErrorKind::InvalidArgument,
            Self::LockTimeout(_)
            | Self::Cancelled
            | Self::ClockMovedBackwards { .. }
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The single rejection every token failure is reported as.
    pub(crate) fn invalid_token() -> Self {
        Self::Unauthenticated("invalid or expired token".into())
    }
}

/// Storage-layer errors returned by the accessors in [`crate::db`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Referenced row does not exist: {0}")]
    MissingReference(String),

    #[error("Timed out waiting for the write lock: {0}")]
    LockTimeout(String),

    #[error("Transaction cancelled")]
    Cancelled,

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::LockTimeout(detail);
                }
                ErrorCode::OperationInterrupted => return Self::Cancelled,
                ErrorCode::ConstraintViolation => match failure.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        return Self::Conflict(detail);
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        return Self::MissingReference(detail);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        Self::Sqlite(err)
    }
}

impl From<StoreError> for AgoraError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => Self::AlreadyExists(detail),
            StoreError::MissingReference(detail) => Self::NotFound(detail),
            StoreError::LockTimeout(detail) => Self::LockTimeout(detail),
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias for Agora operations
pub type Result<T> = std::result::Result<T, AgoraError>;
