use std::sync::Arc;

use course_core::Clock;
use course_core::model::{CourseId, DayNumber, EnrollmentProgress, QuizAttempt};
use tracing::debug;

use super::backend::{BearerToken, CredentialSource, ProgressBackend};
use super::wire::{ProgressPayload, QuizSubmission, SubmissionRecord};
use crate::error::SyncError;

/// The only component that talks to the backend about enrollment progress.
///
/// Every call first resolves the bearer credential; without one the call is
/// not attempted and `SyncError::NotAuthenticated` is returned.
#[derive(Clone)]
pub struct ProgressSyncClient {
    backend: Arc<dyn ProgressBackend>,
    credentials: Arc<dyn CredentialSource>,
    clock: Clock,
}

impl ProgressSyncClient {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ProgressBackend>,
        credentials: Arc<dyn CredentialSource>,
        clock: Clock,
    ) -> Self {
        Self {
            backend,
            credentials,
            clock,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credentials.bearer_token().is_some()
    }

    fn token(&self) -> Result<BearerToken, SyncError> {
        self.credentials
            .bearer_token()
            .ok_or(SyncError::NotAuthenticated)
    }

    /// One-shot fetch of authoritative progress.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when unauthenticated or the backend call fails.
    pub async fn pull(&self, course: CourseId) -> Result<Option<ProgressPayload>, SyncError> {
        let token = self.token()?;
        let payload = self.backend.get_progress(&token, course).await?;
        debug!(%course, found = payload.is_some(), "pulled enrollment progress");
        Ok(payload)
    }

    /// # Errors
    ///
    /// Returns `SyncError` when unauthenticated or the backend rejects the write.
    pub async fn push(
        &self,
        course: CourseId,
        progress: &EnrollmentProgress,
    ) -> Result<(), SyncError> {
        let token = self.token()?;
        let payload = ProgressPayload::from(progress);
        self.backend.put_progress(&token, course, &payload).await?;
        debug!(
            %course,
            progress = payload.progress,
            status = payload.status.as_str(),
            "pushed enrollment progress"
        );
        Ok(())
    }

    /// Prior attempts for one day, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when unauthenticated, the call fails, or a record
    /// is out of range.
    pub async fn pull_quiz_history(
        &self,
        course: CourseId,
        day: DayNumber,
    ) -> Result<Vec<QuizAttempt>, SyncError> {
        let token = self.token()?;
        let records = self
            .backend
            .get_quiz_submissions(&token, course, day)
            .await?;

        let now = self.clock.now();
        let mut attempts = records
            .into_iter()
            .map(|record| record.into_attempt(now))
            .collect::<Result<Vec<_>, _>>()?;
        attempts.sort_by(|a, b| b.attempt_number().cmp(&a.attempt_number()));
        Ok(attempts)
    }

    /// # Errors
    ///
    /// Returns `SyncError::Conflict` for duplicate or stale submissions and
    /// other `SyncError`s for transport failures.
    pub async fn submit_quiz(
        &self,
        submission: &QuizSubmission,
    ) -> Result<SubmissionRecord, SyncError> {
        let token = self.token()?;
        self.backend.post_quiz_submission(&token, submission).await
    }
}
