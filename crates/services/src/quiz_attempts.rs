use course_core::model::{DayNumber, QuizAttempt, score_answers};
use course_core::{Clock, ProgressionError, ProgressionState};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ConflictCode, QuizAttemptError, SyncError};
use crate::sync::{ProgressSyncClient, QuizSubmission, SubmissionRecord};

/// Scores, numbers and submits quiz attempts, and records accepted ones.
///
/// A submission rejected as `already_completed` is retried exactly once with
/// `force_retake` set and the same idempotency key. Any other failure, or a
/// failed retry, is returned to the caller and nothing is recorded.
#[derive(Clone)]
pub struct QuizAttemptManager {
    sync: ProgressSyncClient,
    clock: Clock,
}

impl QuizAttemptManager {
    #[must_use]
    pub fn new(sync: ProgressSyncClient, clock: Clock) -> Self {
        Self { sync, clock }
    }

    /// Submit `answers` for `day` and record the accepted attempt in `state`.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::Progression` when the day has no quiz, the
    /// quiz is locked, or no attempts are left; `QuizAttemptError::SyncConflict`
    /// when the override retry is also rejected; `QuizAttemptError::Sync` for
    /// other backend failures.
    pub async fn submit_attempt(
        &self,
        state: &mut ProgressionState,
        day: DayNumber,
        answers: &[Option<usize>],
    ) -> Result<QuizAttempt, QuizAttemptError> {
        let roadmap = std::sync::Arc::clone(state.roadmap());
        let roadmap_day = roadmap.day(day).ok_or(ProgressionError::UnknownDay(day))?;
        if !roadmap_day.has_quiz() {
            return Err(ProgressionError::NoQuiz(day).into());
        }
        if !state.is_quiz_unlocked(day) {
            return Err(ProgressionError::QuizLocked(day).into());
        }
        let attempt_number = state.ledger().next_attempt_number(day)?;
        let graded = score_answers(&roadmap_day.quiz, answers);

        let mut submission = QuizSubmission {
            course_id: roadmap.course_id(),
            day_number: day,
            answers: answers.to_vec(),
            score: graded.score,
            total_questions: graded.total_questions,
            attempt_number,
            force_retake: false,
            idempotency_key: Uuid::new_v4(),
        };

        let record = match self.sync.submit_quiz(&submission).await {
            Ok(record) => record,
            Err(SyncError::Conflict(ConflictCode::AlreadyCompleted)) => {
                warn!(
                    day,
                    attempt_number, "submission reported already completed, retrying with override"
                );
                submission.force_retake = true;
                self.retry_with_override(&submission).await?
            }
            Err(SyncError::Conflict(code)) => {
                return Err(QuizAttemptError::SyncConflict { day, code });
            }
            Err(err) => return Err(err.into()),
        };

        // numbering stays count-based; the backend's echo only supplies the timestamp
        let attempt = QuizAttempt::new(
            day,
            attempt_number,
            graded.score,
            graded.total_questions,
            record.submitted_at.unwrap_or_else(|| self.clock.now()),
        )?;
        state.record_quiz_attempt(attempt.clone())?;

        debug!(
            day,
            attempt_number,
            score = attempt.score(),
            passed = attempt.passed(),
            "quiz attempt recorded"
        );
        Ok(attempt)
    }

    async fn retry_with_override(
        &self,
        submission: &QuizSubmission,
    ) -> Result<SubmissionRecord, QuizAttemptError> {
        match self.sync.submit_quiz(submission).await {
            Ok(record) => Ok(record),
            Err(SyncError::Conflict(code)) => {
                warn!(day = submission.day_number, %code, "override retry rejected");
                Err(QuizAttemptError::SyncConflict {
                    day: submission.day_number,
                    code,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
