use std::fmt;

use thiserror::Error;

use crate::model::DayNumber;

/// Why a requested day transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionBlock {
    /// The day's video has not been watched yet.
    NotWatched,
    /// The day has a quiz and no attempt has been recorded.
    QuizNotAttempted,
    /// The previous day is not complete, so this day is still locked.
    PreviousDayIncomplete { previous: DayNumber },
}

impl fmt::Display for TransitionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionBlock::NotWatched => write!(f, "video not watched"),
            TransitionBlock::QuizNotAttempted => write!(f, "quiz not attempted"),
            TransitionBlock::PreviousDayIncomplete { previous } => {
                write!(f, "day {previous} is not complete")
            }
        }
    }
}

/// Errors raised by the progression state machine and quiz ledger.
///
/// All variants are recoverable: the caller rejects the action and surfaces
/// a message, the state is left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("day {0} is not part of this course")]
    UnknownDay(DayNumber),

    #[error("cannot complete day {day}: {reason}")]
    InvalidTransition {
        day: DayNumber,
        reason: TransitionBlock,
    },

    #[error("day {0} has no quiz")]
    NoQuiz(DayNumber),

    #[error("quiz for day {0} is locked until its video is watched")]
    QuizLocked(DayNumber),

    #[error("no attempts left for day {day} ({attempts} recorded)")]
    AttemptLimitExceeded { day: DayNumber, attempts: usize },

    #[error("invalid quiz attempt: {0}")]
    InvalidAttempt(String),
}
