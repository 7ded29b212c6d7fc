#![forbid(unsafe_code)]

pub mod error;
pub mod progression_engine;
pub mod quiz_attempts;
pub mod sync;

pub use course_core::Clock;

pub use error::{
    ConflictCode, FailureKind, ProgressionServiceError, QuizAttemptError, SyncError,
};
pub use progression_engine::{
    DaySelection, DayTransition, LoadReport, ProgressionEngine, PushHandle, SyncOutcome,
    VideoProgress,
};
pub use quiz_attempts::QuizAttemptManager;
pub use sync::{
    BearerToken, CredentialSource, HttpProgressBackend, InMemoryBackend, ProgressBackend,
    ProgressSyncClient, StaticCredentials, SyncConfig,
};
