use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use course_core::model::{CourseId, DayNumber, EnrollmentProgress, LearnerId, QuizAttempt, Roadmap};
use course_core::{DayView, ProgressionError, ProgressionState, Reconciliation};
use storage::repository::{CacheKey, CachedProgress, ProgressCache, ViewState};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProgressionServiceError, QuizAttemptError, SyncError};
use crate::quiz_attempts::QuizAttemptManager;
use crate::sync::ProgressSyncClient;

//
// ─── PUSHES ────────────────────────────────────────────────────────────────────
//

/// How a background progress push ended.
#[derive(Debug)]
pub enum SyncOutcome {
    Pushed,
    /// A newer snapshot was already sent, so this one was dropped.
    Superseded,
    /// No credential; nothing was sent.
    Skipped,
    Failed(SyncError),
}

impl SyncOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }
}

/// Handle to a push running in the background.
///
/// Awaiting it yields the outcome. Dropping it lets the push finish and
/// discards its result.
#[derive(Debug)]
pub struct PushHandle {
    task: JoinHandle<SyncOutcome>,
}

impl PushHandle {
    pub async fn outcome(self) -> SyncOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => SyncOutcome::Failed(SyncError::Task(err.to_string())),
        }
    }
}

/// Orders pushes so an older snapshot never lands after a newer one.
#[derive(Default)]
struct PushSequencer {
    issued: AtomicU64,
    last_sent: Mutex<u64>,
}

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// A completed-set change, applied locally, with its push in flight.
#[derive(Debug)]
pub struct DayTransition {
    pub progress: EnrollmentProgress,
    pub push: PushHandle,
}

#[derive(Debug)]
pub struct VideoProgress {
    pub newly_watched: bool,
    /// Present when the day had no quiz and completed on watch.
    pub completed: Option<DayTransition>,
}

/// What happened while opening a course.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Set when the authoritative pull succeeded.
    pub reconciliation: Option<Reconciliation>,
    /// Pull failure; local state was used as-is.
    pub pull_error: Option<SyncError>,
    /// Quiz history for the last viewed day could not be fetched.
    pub history_error: Option<SyncError>,
}

/// Result of switching the viewer to a day.
#[derive(Debug)]
pub struct DaySelection {
    pub view: DayView,
    pub history_error: Option<SyncError>,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// One learner's session on one course.
///
/// Mutations apply to the in-memory state first, are written to the cache
/// before returning, and are pushed to the backend in the background. A failed
/// push is reported through its `PushHandle` and never rolls local state back.
///
/// Pushes are spawned onto the ambient Tokio runtime, so the engine must be
/// driven from inside one.
pub struct ProgressionEngine {
    key: CacheKey,
    state: ProgressionState,
    view: ViewState,
    cache: Arc<dyn ProgressCache>,
    sync: ProgressSyncClient,
    quizzes: QuizAttemptManager,
    sequencer: Arc<PushSequencer>,
    /// Quiz days whose attempt history has been fetched this session.
    hydrated: BTreeSet<DayNumber>,
}

impl ProgressionEngine {
    /// Open a course: restore the cached copy, then merge authoritative
    /// progress once if the backend can be reached. Quiz history for the last
    /// viewed day is fetched as well.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionServiceError::Storage` if the cache cannot be read or
    /// written. Backend failures are reported in the `LoadReport` instead.
    pub async fn load(
        learner: LearnerId,
        roadmap: Arc<Roadmap>,
        cache: Arc<dyn ProgressCache>,
        sync: ProgressSyncClient,
        quizzes: QuizAttemptManager,
    ) -> Result<(Self, LoadReport), ProgressionServiceError> {
        let key = CacheKey::new(learner, roadmap.course_id());
        let cached = cache.load_progress(key).await?;
        let view = cache.load_view_state(key).await?;
        let mut state = ProgressionState::restore(roadmap, cached.watched, cached.completed);

        let mut report = LoadReport::default();
        match sync.pull(key.course).await {
            Ok(Some(remote)) => {
                let merged = state.reconcile(&remote.completed_days);
                if !merged.dropped.is_empty() {
                    warn!(
                        course = %key.course,
                        dropped = ?merged.dropped,
                        "authoritative progress was not a valid prefix"
                    );
                }
                info!(
                    course = %key.course,
                    added = ?merged.added,
                    completed = state.completed().len(),
                    "reconciled cached progress with backend"
                );
                report.reconciliation = Some(merged);
            }
            Ok(None) => debug!(course = %key.course, "backend has no progress yet"),
            Err(SyncError::NotAuthenticated) => {
                debug!(course = %key.course, "no credential, using cached progress only");
            }
            Err(err) => {
                warn!(course = %key.course, error = %err, "progress pull failed, using cached progress");
                report.pull_error = Some(err);
            }
        }

        let mut engine = Self {
            key,
            state,
            view,
            cache,
            sync,
            quizzes,
            sequencer: Arc::new(PushSequencer::default()),
            hydrated: BTreeSet::new(),
        };
        engine.persist().await?;
        if let Some(day) = engine.view.last_viewed_day {
            report.history_error = engine.ensure_quiz_history(day).await.err();
        }
        Ok((engine, report))
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.key.course
    }

    #[must_use]
    pub fn state(&self) -> &ProgressionState {
        &self.state
    }

    #[must_use]
    pub fn view_state(&self) -> ViewState {
        self.view
    }

    #[must_use]
    pub fn progress(&self) -> EnrollmentProgress {
        self.state.progress()
    }

    #[must_use]
    pub fn is_day_locked(&self, day: DayNumber) -> bool {
        self.state.is_day_locked(day)
    }

    #[must_use]
    pub fn is_quiz_unlocked(&self, day: DayNumber) -> bool {
        self.state.is_quiz_unlocked(day)
    }

    #[must_use]
    pub fn check_day_completion(&self, day: DayNumber) -> bool {
        self.state.check_day_completion(day)
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn day_view(&self, day: DayNumber) -> Result<DayView, ProgressionError> {
        self.state.day_view(day)
    }

    /// Attempts for `day`, newest first.
    #[must_use]
    pub fn quiz_history(&self, day: DayNumber) -> Vec<&QuizAttempt> {
        self.state.ledger().attempts_for_display(day)
    }

    //
    // ─── MUTATIONS ─────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `ProgressionServiceError::Progression` for unknown days and
    /// `ProgressionServiceError::Storage` if the cache write fails.
    pub async fn record_video_watched(
        &mut self,
        day: DayNumber,
    ) -> Result<VideoProgress, ProgressionServiceError> {
        let outcome = self.state.record_video_watched(day)?;
        debug!(day, newly_watched = outcome.newly_watched, "video watched");
        self.persist().await?;

        let completed = outcome.auto_completed.map(|progress| {
            info!(day, percent = progress.progress_percent, "day completed on watch");
            let push = self.spawn_push(progress.clone());
            DayTransition { progress, push }
        });
        Ok(VideoProgress {
            newly_watched: outcome.newly_watched,
            completed,
        })
    }

    /// # Errors
    ///
    /// Returns `ProgressionServiceError::Progression` with `InvalidTransition`
    /// when the day cannot be completed yet, and
    /// `ProgressionServiceError::Storage` if the cache write fails.
    pub async fn mark_day_complete(
        &mut self,
        day: DayNumber,
    ) -> Result<DayTransition, ProgressionServiceError> {
        // a failed fetch leaves the local ledger in charge
        let _ = self.ensure_quiz_history(day).await;
        let progress = self.state.mark_day_complete(day)?;
        info!(day, percent = progress.progress_percent, "day marked complete");
        self.persist().await?;
        let push = self.spawn_push(progress.clone());
        Ok(DayTransition { progress, push })
    }

    /// Un-complete `day` and every later day.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionServiceError::Progression` for unknown days and
    /// `ProgressionServiceError::Storage` if the cache write fails.
    pub async fn mark_day_incomplete(
        &mut self,
        day: DayNumber,
    ) -> Result<DayTransition, ProgressionServiceError> {
        let progress = self.state.mark_day_incomplete(day)?;
        info!(day, percent = progress.progress_percent, "day and later days marked incomplete");
        self.persist().await?;
        let push = self.spawn_push(progress.clone());
        Ok(DayTransition { progress, push })
    }

    /// Submit a quiz attempt. Completion is not triggered automatically; call
    /// `mark_day_complete` once `check_day_completion` holds.
    ///
    /// Prior attempts are fetched first so numbering and the attempt cap hold
    /// across sessions.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::Sync` when the history cannot be fetched, and
    /// otherwise see `QuizAttemptManager::submit_attempt`.
    pub async fn submit_quiz(
        &mut self,
        day: DayNumber,
        answers: &[Option<usize>],
    ) -> Result<QuizAttempt, QuizAttemptError> {
        self.ensure_quiz_history(day).await?;
        self.quizzes
            .submit_attempt(&mut self.state, day, answers)
            .await
    }

    /// Point the viewer at `day` and refresh its quiz history.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionServiceError::Progression` for unknown days and
    /// `ProgressionServiceError::Storage` if the view state cannot be saved.
    /// History failures are reported in the `DaySelection`.
    pub async fn select_day(
        &mut self,
        day: DayNumber,
        quiz_view_open: bool,
    ) -> Result<DaySelection, ProgressionServiceError> {
        self.hydrated.remove(&day);
        let history_error = self.ensure_quiz_history(day).await.err();
        let view = self.state.day_view(day)?;

        self.view = ViewState {
            last_viewed_day: Some(day),
            quiz_view_open: quiz_view_open && view.has_quiz,
        };
        self.cache.save_view_state(self.key, self.view).await?;

        Ok(DaySelection {
            view,
            history_error,
        })
    }

    /// Fetch `day`'s attempt history from the backend once per session.
    ///
    /// Days without a quiz are a no-op. Without a credential the local ledger
    /// is authoritative and the day counts as fetched.
    ///
    /// # Errors
    ///
    /// Returns the `SyncError` of a failed pull; the day is retried on the next
    /// call.
    pub async fn ensure_quiz_history(&mut self, day: DayNumber) -> Result<(), SyncError> {
        if !self.state.roadmap().has_quiz(day) || self.hydrated.contains(&day) {
            return Ok(());
        }
        match self.sync.pull_quiz_history(self.key.course, day).await {
            Ok(history) => {
                debug!(day, attempts = history.len(), "quiz history fetched");
                self.state
                    .replace_quiz_history(day, history)
                    .map_err(|err| SyncError::Decode(err.to_string()))?;
            }
            Err(SyncError::NotAuthenticated) => {
                debug!(day, "no credential, quiz history is local only");
            }
            Err(err) => {
                warn!(day, error = %err, "quiz history pull failed, keeping local attempts");
                return Err(err);
            }
        }
        self.hydrated.insert(day);
        Ok(())
    }

    /// Push the current progress again, e.g. after an earlier push failed.
    pub async fn resync(&self) -> PushHandle {
        self.spawn_push(self.state.progress())
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn persist(&self) -> Result<(), ProgressionServiceError> {
        let snapshot = CachedProgress {
            watched: self.state.watched().clone(),
            completed: self.state.completed().clone(),
        };
        self.cache.save_progress(self.key, &snapshot).await?;
        Ok(())
    }

    fn spawn_push(&self, progress: EnrollmentProgress) -> PushHandle {
        let sync = self.sync.clone();
        let sequencer = Arc::clone(&self.sequencer);
        let course = self.key.course;
        let seq = sequencer.issued.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(async move {
            let mut last_sent = sequencer.last_sent.lock().await;
            if *last_sent > seq {
                debug!(%course, seq, "newer progress already pushed");
                return SyncOutcome::Superseded;
            }
            match sync.push(course, &progress).await {
                Ok(()) => {
                    *last_sent = seq;
                    SyncOutcome::Pushed
                }
                Err(SyncError::NotAuthenticated) => SyncOutcome::Skipped,
                Err(err) => {
                    warn!(%course, error = %err, "progress push failed; local state kept");
                    SyncOutcome::Failed(err)
                }
            }
        });
        PushHandle { task }
    }
}
