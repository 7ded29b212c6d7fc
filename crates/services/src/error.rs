//! Shared error types for the services crate.

use course_core::ProgressionError;
use course_core::model::DayNumber;
use storage::repository::StorageError;
use thiserror::Error;

/// Failure categories the view layer turns into user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The requested state change breaks lock or watch rules.
    InvalidTransition,
    /// The day has no quiz attempts left.
    AttemptLimitExceeded,
    /// The backend rejected the write as stale or duplicate.
    SyncConflict,
    /// Transport error, unexpected status, or undecodable payload.
    NetworkFailure,
    /// No bearer credential; the operation was not attempted.
    NotAuthenticated,
    /// The local progress cache failed.
    Storage,
}

/// Conflict reasons the backend reports in its error body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCode {
    AlreadyCompleted,
    Stale,
    Other(String),
}

impl ConflictCode {
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "already_completed" | "duplicate" => Self::AlreadyCompleted,
            "stale" | "stale_write" => Self::Stale,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyCompleted => write!(f, "already_completed"),
            Self::Stale => write!(f, "stale"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Errors from talking to the progress backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("no credential available")]
    NotAuthenticated,
    #[error("backend conflict: {0}")]
    Conflict(ConflictCode),
    #[error("backend responded with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid backend payload: {0}")]
    Decode(String),
    #[error("sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotAuthenticated => FailureKind::NotAuthenticated,
            Self::Conflict(_) => FailureKind::SyncConflict,
            Self::HttpStatus(_)
            | Self::Http(_)
            | Self::Unavailable(_)
            | Self::Decode(_)
            | Self::Task(_) => FailureKind::NetworkFailure,
        }
    }
}

fn progression_kind(err: &ProgressionError) -> FailureKind {
    match err {
        ProgressionError::AttemptLimitExceeded { .. } => FailureKind::AttemptLimitExceeded,
        _ => FailureKind::InvalidTransition,
    }
}

/// Errors emitted by `QuizAttemptManager`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizAttemptError {
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error("submission for day {day} rejected after override retry: {code}")]
    SyncConflict { day: DayNumber, code: ConflictCode },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl QuizAttemptError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Progression(err) => progression_kind(err),
            Self::SyncConflict { .. } => FailureKind::SyncConflict,
            Self::Sync(err) => err.kind(),
        }
    }
}

/// Errors emitted by `ProgressionEngine`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionServiceError {
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error(transparent)]
    Quiz(#[from] QuizAttemptError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressionServiceError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Progression(err) => progression_kind(err),
            Self::Quiz(err) => err.kind(),
            Self::Storage(_) => FailureKind::Storage,
        }
    }
}
