//! Per-learner, per-course progression state machine.
//!
//! Each day moves `Locked -> NotWatched -> Watched -> [QuizPending ->] Completed`.
//! `mark_day_incomplete` is the only backwards edge and truncates every later
//! day as well, because later completions depend on earlier ones.
//!
//! The completed set is always a prefix `1..=k`; every mutating operation
//! preserves that.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ProgressionError, TransitionBlock};
use crate::model::{
    DayNumber, EnrollmentProgress, QuizAttempt, QuizAttemptLedger, Roadmap, contiguous_prefix,
    is_prefix_contiguous,
};

/// Where a single day sits in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    Locked,
    NotWatched,
    /// Watched and ready to be marked complete.
    Watched,
    /// Watched, but the day's quiz has no attempt yet.
    QuizPending,
    Completed,
}

/// Derived, read-only flags for rendering a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayView {
    pub day: DayNumber,
    pub state: DayState,
    pub locked: bool,
    pub watched: bool,
    pub completed: bool,
    pub has_quiz: bool,
    pub quiz_unlocked: bool,
    pub attempts_used: usize,
    pub attempts_remaining: usize,
    pub best_score: Option<u8>,
    /// Some attempt reached the pass threshold; drives the "continue" prompt.
    pub passed: bool,
    pub can_attempt: bool,
    pub ready_to_complete: bool,
}

/// Result of recording a video-completed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoWatched {
    pub newly_watched: bool,
    /// Set when the day had no quiz and was completed automatically.
    pub auto_completed: Option<EnrollmentProgress>,
}

/// What a load-time merge with authoritative progress changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Days newly marked complete from the authoritative set.
    pub added: Vec<DayNumber>,
    /// Days dropped to keep the completed set a valid prefix.
    pub dropped: Vec<DayNumber>,
}

impl Reconciliation {
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.dropped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressionState {
    roadmap: Arc<Roadmap>,
    watched: BTreeSet<DayNumber>,
    completed: BTreeSet<DayNumber>,
    ledger: QuizAttemptLedger,
}

impl ProgressionState {
    #[must_use]
    pub fn new(roadmap: Arc<Roadmap>) -> Self {
        Self {
            roadmap,
            watched: BTreeSet::new(),
            completed: BTreeSet::new(),
            ledger: QuizAttemptLedger::new(),
        }
    }

    /// Rebuild state from a cached copy.
    ///
    /// Days outside the roadmap are discarded, completed days are cut back to
    /// their contiguous prefix, and watched is widened to cover completed.
    #[must_use]
    pub fn restore(
        roadmap: Arc<Roadmap>,
        watched: BTreeSet<DayNumber>,
        completed: BTreeSet<DayNumber>,
    ) -> Self {
        let mut state = Self::new(roadmap);
        state.watched = watched
            .into_iter()
            .filter(|d| state.roadmap.contains(*d))
            .collect();
        state.completed = state.normalized(completed);
        state.watched.extend(state.completed.iter().copied());
        state
    }

    #[must_use]
    pub fn roadmap(&self) -> &Arc<Roadmap> {
        &self.roadmap
    }

    #[must_use]
    pub fn watched(&self) -> &BTreeSet<DayNumber> {
        &self.watched
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<DayNumber> {
        &self.completed
    }

    #[must_use]
    pub fn ledger(&self) -> &QuizAttemptLedger {
        &self.ledger
    }

    #[must_use]
    pub fn progress(&self) -> EnrollmentProgress {
        EnrollmentProgress::compute(&self.completed, self.roadmap.total_days())
    }

    /// First day not yet completed, or the last day once everything is done.
    #[must_use]
    pub fn resume_day(&self) -> DayNumber {
        let next = u32::try_from(self.completed.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        next.min(self.roadmap.total_days())
    }

    //
    // ─── QUERIES ───────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn is_day_locked(&self, day: DayNumber) -> bool {
        day > 1 && !self.completed.contains(&(day - 1))
    }

    #[must_use]
    pub fn is_quiz_unlocked(&self, day: DayNumber) -> bool {
        self.watched.contains(&day) || self.completed.contains(&day)
    }

    /// Watched, and for quiz days at least one recorded attempt. The score
    /// does not matter here.
    #[must_use]
    pub fn check_day_completion(&self, day: DayNumber) -> bool {
        self.completion_block(day).is_none()
    }

    fn completion_block(&self, day: DayNumber) -> Option<TransitionBlock> {
        if !self.watched.contains(&day) {
            return Some(TransitionBlock::NotWatched);
        }
        if self.roadmap.has_quiz(day) && !self.ledger.has_attempt(day) {
            return Some(TransitionBlock::QuizNotAttempted);
        }
        None
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn day_state(&self, day: DayNumber) -> Result<DayState, ProgressionError> {
        self.ensure_known(day)?;
        let state = if self.completed.contains(&day) {
            DayState::Completed
        } else if self.is_day_locked(day) {
            DayState::Locked
        } else if !self.watched.contains(&day) {
            DayState::NotWatched
        } else if self.roadmap.has_quiz(day) && !self.ledger.has_attempt(day) {
            DayState::QuizPending
        } else {
            DayState::Watched
        };
        Ok(state)
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn day_view(&self, day: DayNumber) -> Result<DayView, ProgressionError> {
        let state = self.day_state(day)?;
        let has_quiz = self.roadmap.has_quiz(day);
        let quiz_unlocked = has_quiz && self.is_quiz_unlocked(day);
        let attempts_remaining = if has_quiz {
            self.ledger.attempts_remaining(day)
        } else {
            0
        };
        Ok(DayView {
            day,
            state,
            locked: self.is_day_locked(day),
            watched: self.watched.contains(&day),
            completed: self.completed.contains(&day),
            has_quiz,
            quiz_unlocked,
            attempts_used: self.ledger.attempt_count(day),
            attempts_remaining,
            best_score: self.ledger.best_score(day),
            passed: self.ledger.has_passed(day),
            can_attempt: quiz_unlocked && attempts_remaining > 0,
            ready_to_complete: state == DayState::Watched,
        })
    }

    //
    // ─── TRANSITIONS ───────────────────────────────────────────────────────────
    //

    /// Move `day` into the completed set.
    ///
    /// Completing an already completed day is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::InvalidTransition` when the day is not watched,
    /// its quiz has no attempt, or the previous day is incomplete.
    pub fn mark_day_complete(
        &mut self,
        day: DayNumber,
    ) -> Result<EnrollmentProgress, ProgressionError> {
        self.ensure_known(day)?;
        if self.completed.contains(&day) {
            return Ok(self.progress());
        }
        if let Some(reason) = self.completion_block(day) {
            return Err(ProgressionError::InvalidTransition { day, reason });
        }
        if self.is_day_locked(day) {
            return Err(ProgressionError::InvalidTransition {
                day,
                reason: TransitionBlock::PreviousDayIncomplete { previous: day - 1 },
            });
        }

        self.completed.insert(day);
        debug_assert!(is_prefix_contiguous(&self.completed));
        Ok(self.progress())
    }

    /// Remove `day` and every later day from both completed and watched.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn mark_day_incomplete(
        &mut self,
        day: DayNumber,
    ) -> Result<EnrollmentProgress, ProgressionError> {
        self.ensure_known(day)?;
        self.completed.retain(|d| *d < day);
        self.watched.retain(|d| *d < day);
        debug_assert!(is_prefix_contiguous(&self.completed));
        Ok(self.progress())
    }

    /// Record the video-completed signal for `day`.
    ///
    /// Quiz-free days whose predecessor is complete are completed right away.
    /// A locked day is still recorded as watched but stays incomplete.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn record_video_watched(
        &mut self,
        day: DayNumber,
    ) -> Result<VideoWatched, ProgressionError> {
        self.ensure_known(day)?;
        let newly_watched = self.watched.insert(day);

        let auto_completed = if !self.roadmap.has_quiz(day)
            && !self.completed.contains(&day)
            && !self.is_day_locked(day)
            && self.check_day_completion(day)
        {
            Some(self.mark_day_complete(day)?)
        } else {
            None
        };

        Ok(VideoWatched {
            newly_watched,
            auto_completed,
        })
    }

    /// Append a submitted attempt to the ledger.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::QuizLocked` when the video has not been
    /// watched, and ledger errors for capped days or out-of-order numbers.
    pub fn record_quiz_attempt(&mut self, attempt: QuizAttempt) -> Result<(), ProgressionError> {
        let day = attempt.day_number();
        self.ensure_quiz(day)?;
        if !self.is_quiz_unlocked(day) {
            return Err(ProgressionError::QuizLocked(day));
        }
        self.ledger.record(attempt)
    }

    /// Replace a day's attempts with the authoritative history.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::UnknownDay` for days outside the roadmap.
    pub fn replace_quiz_history(
        &mut self,
        day: DayNumber,
        history: Vec<QuizAttempt>,
    ) -> Result<(), ProgressionError> {
        self.ensure_known(day)?;
        self.ledger.replace_day(day, history);
        Ok(())
    }

    /// Merge an authoritative completed set into local state.
    ///
    /// The union is cut back to a valid prefix within the roadmap, and watched
    /// is widened to cover every completed day.
    pub fn reconcile(&mut self, authoritative: &BTreeSet<DayNumber>) -> Reconciliation {
        let before = self.completed.clone();
        let union: BTreeSet<DayNumber> = before.union(authoritative).copied().collect();
        let merged = self.normalized(union.clone());

        let added = merged.difference(&before).copied().collect();
        let dropped = union.difference(&merged).copied().collect();

        self.completed = merged;
        self.watched.extend(self.completed.iter().copied());
        debug_assert!(is_prefix_contiguous(&self.completed));

        Reconciliation { added, dropped }
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    fn normalized(&self, days: BTreeSet<DayNumber>) -> BTreeSet<DayNumber> {
        let in_range: BTreeSet<DayNumber> = days
            .into_iter()
            .filter(|d| self.roadmap.contains(*d))
            .collect();
        contiguous_prefix(&in_range)
    }

    fn ensure_known(&self, day: DayNumber) -> Result<(), ProgressionError> {
        if self.roadmap.contains(day) {
            Ok(())
        } else {
            Err(ProgressionError::UnknownDay(day))
        }
    }

    fn ensure_quiz(&self, day: DayNumber) -> Result<(), ProgressionError> {
        self.ensure_known(day)?;
        if self.roadmap.has_quiz(day) {
            Ok(())
        } else {
            Err(ProgressionError::NoQuiz(day))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CourseId, EnrollmentStatus, QuizQuestion, RoadmapDay};
    use crate::time::fixed_now;

    fn quiz() -> Vec<QuizQuestion> {
        vec![QuizQuestion {
            prompt: "pick b".into(),
            options: vec!["a".into(), "b".into()],
            correct_option: 1,
        }]
    }

    /// Five days; the listed days carry a quiz.
    fn roadmap(quiz_days: &[DayNumber]) -> Arc<Roadmap> {
        let days = (1..=5)
            .map(|n| {
                let day = RoadmapDay::new(n, format!("Topic {n}"), format!("video-{n}"));
                if quiz_days.contains(&n) {
                    day.with_quiz(quiz())
                } else {
                    day
                }
            })
            .collect();
        Arc::new(Roadmap::new(CourseId::new(1), days).unwrap())
    }

    fn attempt(day: DayNumber, number: u32, score: u8) -> QuizAttempt {
        QuizAttempt::new(day, number, score, 1, fixed_now()).unwrap()
    }

    fn set(days: &[DayNumber]) -> BTreeSet<DayNumber> {
        days.iter().copied().collect()
    }

    fn assert_prefix(state: &ProgressionState) {
        assert!(is_prefix_contiguous(state.completed()), "{:?}", state.completed());
    }

    #[test]
    fn lock_rules() {
        let mut state = ProgressionState::new(roadmap(&[]));
        assert!(!state.is_day_locked(1));
        assert!(state.is_day_locked(2));

        state.record_video_watched(1).unwrap();
        assert!(!state.is_day_locked(2));
        assert!(state.is_day_locked(3));
    }

    #[test]
    fn watching_quiz_free_days_in_order_completes_them() {
        let mut state = ProgressionState::new(roadmap(&[]));

        let outcome = state.record_video_watched(1).unwrap();
        assert!(outcome.newly_watched);
        let progress = outcome.auto_completed.unwrap();
        assert_eq!(progress.completed_days, set(&[1]));
        assert_eq!(progress.progress_percent, 20);
        assert_eq!(progress.status, EnrollmentStatus::Started);
        assert_prefix(&state);
    }

    #[test]
    fn watching_a_locked_day_does_not_complete_it() {
        let mut state = ProgressionState::new(roadmap(&[]));
        state.record_video_watched(1).unwrap();

        let outcome = state.record_video_watched(3).unwrap();
        assert!(outcome.auto_completed.is_none());
        assert!(state.is_day_locked(3));
        assert_eq!(state.day_state(3).unwrap(), DayState::Locked);

        let err = state.mark_day_complete(3).unwrap_err();
        assert_eq!(
            err,
            ProgressionError::InvalidTransition {
                day: 3,
                reason: TransitionBlock::PreviousDayIncomplete { previous: 2 },
            }
        );
        assert_eq!(state.completed(), &set(&[1]));
        assert_prefix(&state);
    }

    #[test]
    fn quiz_day_needs_an_attempt_but_not_a_pass() {
        let mut state = ProgressionState::new(roadmap(&[2]));
        state.record_video_watched(1).unwrap();

        assert!(!state.is_quiz_unlocked(2));
        let outcome = state.record_video_watched(2).unwrap();
        assert!(outcome.auto_completed.is_none());
        assert!(state.is_quiz_unlocked(2));
        assert_eq!(state.day_state(2).unwrap(), DayState::QuizPending);
        assert!(matches!(
            state.mark_day_complete(2),
            Err(ProgressionError::InvalidTransition {
                reason: TransitionBlock::QuizNotAttempted,
                ..
            })
        ));

        state.record_quiz_attempt(attempt(2, 1, 60)).unwrap();
        assert!(state.check_day_completion(2));
        let view = state.day_view(2).unwrap();
        assert!(!view.passed);
        assert!(view.ready_to_complete);

        let progress = state.mark_day_complete(2).unwrap();
        assert_eq!(progress.completed_days, set(&[1, 2]));
        assert_eq!(progress.progress_percent, 40);
    }

    #[test]
    fn unwatched_day_cannot_be_completed() {
        let mut state = ProgressionState::new(roadmap(&[]));
        let err = state.mark_day_complete(1).unwrap_err();
        assert_eq!(
            err,
            ProgressionError::InvalidTransition {
                day: 1,
                reason: TransitionBlock::NotWatched,
            }
        );
    }

    #[test]
    fn quiz_attempt_requires_watched_video() {
        let mut state = ProgressionState::new(roadmap(&[1]));
        assert_eq!(
            state.record_quiz_attempt(attempt(1, 1, 50)).unwrap_err(),
            ProgressionError::QuizLocked(1)
        );
        assert_eq!(
            state.record_quiz_attempt(attempt(2, 1, 50)).unwrap_err(),
            ProgressionError::NoQuiz(2)
        );
    }

    #[test]
    fn mark_incomplete_truncates_later_days() {
        let mut state = ProgressionState::new(roadmap(&[]));
        for day in 1..=4 {
            state.record_video_watched(day).unwrap();
        }
        assert_eq!(state.completed(), &set(&[1, 2, 3, 4]));

        let progress = state.mark_day_incomplete(2).unwrap();
        assert_eq!(state.completed(), &set(&[1]));
        assert_eq!(state.watched(), &set(&[1]));
        assert_eq!(progress.progress_percent, 20);
        assert!(state.is_day_locked(3));
        assert_prefix(&state);
    }

    #[test]
    fn complete_then_incomplete_restores_completed_set() {
        let mut state = ProgressionState::new(roadmap(&[3]));
        state.record_video_watched(1).unwrap();
        state.record_video_watched(2).unwrap();
        state.record_video_watched(3).unwrap();
        state.record_quiz_attempt(attempt(3, 1, 90)).unwrap();

        let completed_before = state.completed().clone();
        let watched_before = state.watched().clone();

        state.mark_day_complete(3).unwrap();
        state.mark_day_incomplete(3).unwrap();

        assert_eq!(state.completed(), &completed_before);
        // un-marking is a truncation, so the day's own watch is dropped too
        let expected_watched: BTreeSet<DayNumber> =
            watched_before.into_iter().filter(|d| *d < 3).collect();
        assert_eq!(state.watched(), &expected_watched);
    }

    #[test]
    fn completing_twice_is_a_no_op() {
        let mut state = ProgressionState::new(roadmap(&[]));
        state.record_video_watched(1).unwrap();
        let again = state.mark_day_complete(1).unwrap();
        assert_eq!(again.completed_days, set(&[1]));
        let rewatch = state.record_video_watched(1).unwrap();
        assert!(!rewatch.newly_watched);
        assert!(rewatch.auto_completed.is_none());
    }

    #[test]
    fn unknown_days_are_rejected() {
        let mut state = ProgressionState::new(roadmap(&[]));
        assert_eq!(
            state.record_video_watched(6).unwrap_err(),
            ProgressionError::UnknownDay(6)
        );
        assert_eq!(state.mark_day_incomplete(0).unwrap_err(), ProgressionError::UnknownDay(0));
        assert!(state.day_view(9).is_err());
    }

    #[test]
    fn restore_normalizes_cached_sets() {
        let state = ProgressionState::restore(roadmap(&[]), set(&[4, 9]), set(&[1, 2, 4, 7]));
        assert_eq!(state.completed(), &set(&[1, 2]));
        assert_eq!(state.watched(), &set(&[1, 2, 4]));
        assert_eq!(state.resume_day(), 3);
    }

    #[test]
    fn reconcile_unions_server_progress() {
        let mut state = ProgressionState::restore(roadmap(&[]), set(&[1, 2]), set(&[1]));
        let report = state.reconcile(&set(&[1, 2]));
        assert_eq!(report.added, vec![2]);
        assert!(report.dropped.is_empty());
        assert_eq!(state.completed(), &set(&[1, 2]));
        assert!(state.watched().is_superset(&set(&[1, 2])));
    }

    #[test]
    fn reconcile_drops_days_that_break_the_prefix() {
        let mut state = ProgressionState::new(roadmap(&[]));
        let report = state.reconcile(&set(&[1, 3, 8]));
        assert_eq!(report.added, vec![1]);
        assert_eq!(report.dropped, vec![3, 8]);
        assert_eq!(state.completed(), &set(&[1]));
        assert!(report.changed());
    }

    #[test]
    fn progress_is_recomputed_after_every_mutation() {
        let mut state = ProgressionState::new(roadmap(&[]));
        for day in 1..=5 {
            state.record_video_watched(day).unwrap();
            assert_eq!(
                state.progress().progress_percent,
                crate::model::progress_percent(state.completed().len(), 5)
            );
        }
        assert_eq!(state.progress().status, EnrollmentStatus::Completed);
        assert_eq!(state.resume_day(), 5);

        state.mark_day_incomplete(1).unwrap();
        assert_eq!(state.progress().progress_percent, 0);
        assert_eq!(state.progress().status, EnrollmentStatus::Enrolled);
    }

    #[test]
    fn day_view_reports_attempt_budget() {
        let mut state = ProgressionState::new(roadmap(&[1]));
        state.record_video_watched(1).unwrap();
        state.record_quiz_attempt(attempt(1, 1, 100)).unwrap();

        let view = state.day_view(1).unwrap();
        assert_eq!(view.attempts_used, 1);
        assert_eq!(view.attempts_remaining, 0);
        assert!(!view.can_attempt);
        assert!(view.passed);
        assert_eq!(view.best_score, Some(100));
    }
}
