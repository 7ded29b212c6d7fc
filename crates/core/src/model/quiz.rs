use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProgressionError;
use crate::model::roadmap::{DayNumber, QuizQuestion};

/// Hard cap on recorded attempts per day.
pub const MAX_ATTEMPTS_PER_DAY: usize = 2;

/// Minimum score that counts as passing.
pub const PASS_THRESHOLD: u8 = 70;

/// A perfect score ends the attempts for that day.
pub const PERFECT_SCORE: u8 = 100;

//
// ─── SCORING ───────────────────────────────────────────────────────────────────
//

/// Outcome of grading a set of answers against a day's questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    pub score: u8,
    pub correct: u32,
    pub total_questions: u32,
}

/// Grade `answers` (chosen option per question) against `questions`.
///
/// Missing answers count as wrong and extra answers are ignored. The score is
/// `round(100 * correct / total)`, half rounded up.
#[must_use]
pub fn score_answers(questions: &[QuizQuestion], answers: &[Option<usize>]) -> QuizScore {
    let total = u32::try_from(questions.len()).unwrap_or(u32::MAX);
    let correct = questions
        .iter()
        .zip(answers.iter().chain(std::iter::repeat(&None)))
        .filter(|(q, a)| **a == Some(q.correct_option))
        .count();
    let correct = u32::try_from(correct).unwrap_or(u32::MAX);

    let score = if total == 0 {
        0
    } else {
        let scaled = (200 * u64::from(correct) + u64::from(total)) / (2 * u64::from(total));
        u8::try_from(scaled).unwrap_or(PERFECT_SCORE)
    };

    QuizScore {
        score,
        correct,
        total_questions: total,
    }
}

//
// ─── ATTEMPTS ──────────────────────────────────────────────────────────────────
//

/// One recorded quiz submission. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    day_number: DayNumber,
    attempt_number: u32,
    score: u8,
    total_questions: u32,
    submitted_at: DateTime<Utc>,
}

impl QuizAttempt {
    /// # Errors
    ///
    /// Returns `ProgressionError::InvalidAttempt` for a zero attempt number or a
    /// score above 100.
    pub fn new(
        day_number: DayNumber,
        attempt_number: u32,
        score: u8,
        total_questions: u32,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, ProgressionError> {
        if attempt_number == 0 {
            return Err(ProgressionError::InvalidAttempt(
                "attempt numbers start at 1".into(),
            ));
        }
        if score > PERFECT_SCORE {
            return Err(ProgressionError::InvalidAttempt(format!(
                "score {score} exceeds {PERFECT_SCORE}"
            )));
        }
        Ok(Self {
            day_number,
            attempt_number,
            score,
            total_questions,
            submitted_at,
        })
    }

    #[must_use]
    pub fn day_number(&self) -> DayNumber {
        self.day_number
    }

    #[must_use]
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    #[must_use]
    pub fn score(&self) -> u8 {
        self.score
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.score >= PASS_THRESHOLD
    }

    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.score == PERFECT_SCORE
    }
}

//
// ─── LEDGER ────────────────────────────────────────────────────────────────────
//

/// Per-day list of attempts, kept in ascending attempt order.
///
/// Attempts accumulate; nothing is overwritten. A day accepts new attempts
/// while it has fewer than [`MAX_ATTEMPTS_PER_DAY`] and none of them is perfect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizAttemptLedger {
    by_day: BTreeMap<DayNumber, Vec<QuizAttempt>>,
}

impl QuizAttemptLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attempts(&self, day: DayNumber) -> &[QuizAttempt] {
        self.by_day.get(&day).map_or(&[], Vec::as_slice)
    }

    /// Attempts newest first, for display.
    #[must_use]
    pub fn attempts_for_display(&self, day: DayNumber) -> Vec<&QuizAttempt> {
        self.attempts(day).iter().rev().collect()
    }

    #[must_use]
    pub fn attempt_count(&self, day: DayNumber) -> usize {
        self.attempts(day).len()
    }

    #[must_use]
    pub fn has_attempt(&self, day: DayNumber) -> bool {
        self.attempt_count(day) > 0
    }

    #[must_use]
    pub fn best_score(&self, day: DayNumber) -> Option<u8> {
        self.attempts(day).iter().map(QuizAttempt::score).max()
    }

    #[must_use]
    pub fn has_passed(&self, day: DayNumber) -> bool {
        self.attempts(day).iter().any(QuizAttempt::passed)
    }

    #[must_use]
    pub fn attempts_remaining(&self, day: DayNumber) -> usize {
        let attempts = self.attempts(day);
        if attempts.iter().any(QuizAttempt::is_perfect) {
            return 0;
        }
        MAX_ATTEMPTS_PER_DAY.saturating_sub(attempts.len())
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::AttemptLimitExceeded` when the day is capped.
    pub fn ensure_can_attempt(&self, day: DayNumber) -> Result<(), ProgressionError> {
        if self.attempts_remaining(day) == 0 {
            return Err(ProgressionError::AttemptLimitExceeded {
                day,
                attempts: self.attempt_count(day),
            });
        }
        Ok(())
    }

    /// Number the next attempt for `day` gets: recorded count plus one.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::AttemptLimitExceeded` when the day is capped.
    pub fn next_attempt_number(&self, day: DayNumber) -> Result<u32, ProgressionError> {
        self.ensure_can_attempt(day)?;
        let count = u32::try_from(self.attempt_count(day)).unwrap_or(u32::MAX);
        Ok(count.saturating_add(1))
    }

    /// Append a new attempt.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::AttemptLimitExceeded` when the day is capped,
    /// and `ProgressionError::InvalidAttempt` when the attempt number does not
    /// follow the last recorded one.
    pub fn record(&mut self, attempt: QuizAttempt) -> Result<(), ProgressionError> {
        let day = attempt.day_number();
        self.ensure_can_attempt(day)?;
        if let Some(last) = self.attempts(day).last() {
            if attempt.attempt_number() <= last.attempt_number() {
                return Err(ProgressionError::InvalidAttempt(format!(
                    "attempt {} for day {day} does not follow attempt {}",
                    attempt.attempt_number(),
                    last.attempt_number()
                )));
            }
        }
        self.by_day.entry(day).or_default().push(attempt);
        Ok(())
    }

    /// Replace a day's attempts with an authoritative history.
    ///
    /// The history may arrive in any order; it is stored ascending and
    /// deduplicated by attempt number. Attempts for other days are ignored.
    pub fn replace_day(&mut self, day: DayNumber, history: Vec<QuizAttempt>) {
        let mut attempts: Vec<QuizAttempt> = history
            .into_iter()
            .filter(|a| a.day_number() == day)
            .collect();
        attempts.sort_by_key(QuizAttempt::attempt_number);
        attempts.dedup_by_key(|a| a.attempt_number());

        if attempts.is_empty() {
            self.by_day.remove(&day);
        } else {
            self.by_day.insert(day, attempts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn questions(n: usize) -> Vec<QuizQuestion> {
        (0..n)
            .map(|i| QuizQuestion {
                prompt: format!("Q{i}"),
                options: vec!["a".into(), "b".into(), "c".into()],
                correct_option: 1,
            })
            .collect()
    }

    fn attempt(day: DayNumber, number: u32, score: u8) -> QuizAttempt {
        QuizAttempt::new(day, number, score, 5, fixed_now()).unwrap()
    }

    #[test]
    fn scoring_rounds_to_nearest_percent() {
        let qs = questions(3);
        let two_of_three = score_answers(&qs, &[Some(1), Some(1), Some(0)]);
        assert_eq!(two_of_three.score, 67);
        assert_eq!(two_of_three.correct, 2);

        let one_of_eight = score_answers(&questions(8), &[Some(1)]);
        assert_eq!(one_of_eight.score, 13);
        assert_eq!(one_of_eight.total_questions, 8);
    }

    #[test]
    fn scoring_ignores_extra_answers_and_counts_missing_as_wrong() {
        let qs = questions(2);
        assert_eq!(score_answers(&qs, &[Some(1), Some(1), Some(1)]).score, 100);
        assert_eq!(score_answers(&qs, &[None]).score, 0);
        assert_eq!(score_answers(&[], &[]).score, 0);
    }

    #[test]
    fn attempt_rejects_out_of_range_values() {
        assert!(QuizAttempt::new(1, 0, 50, 5, fixed_now()).is_err());
        assert!(QuizAttempt::new(1, 1, 101, 5, fixed_now()).is_err());
        let a = attempt(1, 1, 70);
        assert!(a.passed());
        assert!(!attempt(1, 1, 69).passed());
    }

    #[test]
    fn third_attempt_is_refused() {
        let mut ledger = QuizAttemptLedger::new();
        ledger.record(attempt(2, 1, 40)).unwrap();
        assert_eq!(ledger.next_attempt_number(2).unwrap(), 2);
        ledger.record(attempt(2, 2, 50)).unwrap();

        let err = ledger.next_attempt_number(2).unwrap_err();
        assert_eq!(err, ProgressionError::AttemptLimitExceeded { day: 2, attempts: 2 });
        assert!(ledger.record(attempt(2, 3, 90)).is_err());
        assert_eq!(ledger.attempt_count(2), 2);
    }

    #[test]
    fn perfect_first_attempt_closes_the_day() {
        let mut ledger = QuizAttemptLedger::new();
        ledger.record(attempt(2, 1, 100)).unwrap();
        assert_eq!(ledger.attempts_remaining(2), 0);
        assert!(matches!(
            ledger.next_attempt_number(2),
            Err(ProgressionError::AttemptLimitExceeded { day: 2, attempts: 1 })
        ));
    }

    #[test]
    fn record_requires_increasing_attempt_numbers() {
        let mut ledger = QuizAttemptLedger::new();
        ledger.record(attempt(1, 1, 10)).unwrap();
        let err = ledger.record(attempt(1, 1, 20)).unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidAttempt(_)));
    }

    #[test]
    fn replace_day_sorts_and_numbers_by_count() {
        let mut ledger = QuizAttemptLedger::new();
        ledger.replace_day(3, vec![attempt(3, 2, 80), attempt(3, 1, 30), attempt(4, 1, 10)]);

        let numbers: Vec<u32> = ledger.attempts(3).iter().map(QuizAttempt::attempt_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        let display: Vec<u32> = ledger
            .attempts_for_display(3)
            .into_iter()
            .map(QuizAttempt::attempt_number)
            .collect();
        assert_eq!(display, vec![2, 1]);
        assert_eq!(ledger.best_score(3), Some(80));
        assert!(ledger.has_passed(3));
        assert!(!ledger.has_attempt(4));

        ledger.replace_day(3, Vec::new());
        assert!(!ledger.has_attempt(3));
    }
}
