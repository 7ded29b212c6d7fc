use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use course_core::model::{CourseId, DayNumber};

use super::backend::{BearerToken, ProgressBackend};
use super::wire::{ProgressPayload, QuizSubmission, SubmissionRecord};
use crate::error::{ConflictCode, SyncError};

/// Canned failure for the next matching request.
#[derive(Debug, Clone)]
enum Scripted {
    Unavailable,
    Conflict(ConflictCode),
}

impl Scripted {
    fn into_error(self) -> SyncError {
        match self {
            Scripted::Unavailable => SyncError::Unavailable("scripted outage".into()),
            Scripted::Conflict(code) => SyncError::Conflict(code),
        }
    }
}

#[derive(Default)]
struct BackendState {
    progress: HashMap<CourseId, ProgressPayload>,
    submissions: HashMap<(CourseId, DayNumber), Vec<SubmissionRecord>>,
    received: Vec<QuizSubmission>,
    pushes: Vec<(CourseId, ProgressPayload)>,
    put_failures: VecDeque<Scripted>,
    pull_failures: VecDeque<Scripted>,
    submission_failures: VecDeque<Scripted>,
}

/// In-memory backend for tests and offline runs.
///
/// Failures can be scripted per request type; each scripted failure is used
/// once, in order.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_progress(&self, course: CourseId, payload: ProgressPayload) {
        self.lock().progress.insert(course, payload);
    }

    #[must_use]
    pub fn progress(&self, course: CourseId) -> Option<ProgressPayload> {
        self.lock().progress.get(&course).cloned()
    }

    /// Every accepted push, oldest first.
    #[must_use]
    pub fn pushes(&self) -> Vec<(CourseId, ProgressPayload)> {
        self.lock().pushes.clone()
    }

    /// Every quiz submission received, including rejected ones.
    #[must_use]
    pub fn received_submissions(&self) -> Vec<QuizSubmission> {
        self.lock().received.clone()
    }

    pub fn seed_submission(&self, course: CourseId, record: SubmissionRecord) {
        self.lock()
            .submissions
            .entry((course, record.day_number))
            .or_default()
            .push(record);
    }

    pub fn fail_next_put(&self) {
        self.lock().put_failures.push_back(Scripted::Unavailable);
    }

    pub fn fail_next_pull(&self) {
        self.lock().pull_failures.push_back(Scripted::Unavailable);
    }

    pub fn fail_next_submission(&self) {
        self.lock().submission_failures.push_back(Scripted::Unavailable);
    }

    pub fn conflict_next_submission(&self, code: ConflictCode) {
        self.lock()
            .submission_failures
            .push_back(Scripted::Conflict(code));
    }
}

#[async_trait]
impl ProgressBackend for InMemoryBackend {
    async fn get_progress(
        &self,
        _token: &BearerToken,
        course: CourseId,
    ) -> Result<Option<ProgressPayload>, SyncError> {
        let mut state = self.lock();
        if let Some(failure) = state.pull_failures.pop_front() {
            return Err(failure.into_error());
        }
        Ok(state.progress.get(&course).cloned())
    }

    async fn put_progress(
        &self,
        _token: &BearerToken,
        course: CourseId,
        payload: &ProgressPayload,
    ) -> Result<(), SyncError> {
        let mut state = self.lock();
        if let Some(failure) = state.put_failures.pop_front() {
            return Err(failure.into_error());
        }
        state.progress.insert(course, payload.clone());
        state.pushes.push((course, payload.clone()));
        Ok(())
    }

    async fn post_quiz_submission(
        &self,
        _token: &BearerToken,
        submission: &QuizSubmission,
    ) -> Result<SubmissionRecord, SyncError> {
        let mut state = self.lock();
        state.received.push(submission.clone());

        if let Some(failure) = state.submission_failures.pop_front() {
            return Err(failure.into_error());
        }

        let record = SubmissionRecord {
            day_number: submission.day_number,
            attempt_number: submission.attempt_number,
            score: submission.score,
            total_questions: submission.total_questions,
            submitted_at: None,
        };
        state
            .submissions
            .entry((submission.course_id, submission.day_number))
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn get_quiz_submissions(
        &self,
        _token: &BearerToken,
        course: CourseId,
        day: DayNumber,
    ) -> Result<Vec<SubmissionRecord>, SyncError> {
        let mut state = self.lock();
        if let Some(failure) = state.pull_failures.pop_front() {
            return Err(failure.into_error());
        }
        Ok(state
            .submissions
            .get(&(course, day))
            .cloned()
            .unwrap_or_default())
    }
}
