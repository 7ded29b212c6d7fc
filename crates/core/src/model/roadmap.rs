use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::CourseId;

/// 1-based position of a day within a course.
pub type DayNumber = u32;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoadmapError {
    #[error("roadmap has no days")]
    Empty,

    #[error("day numbers must run 1..=N without gaps: expected {expected}, found {found}")]
    OutOfSequence {
        expected: DayNumber,
        found: DayNumber,
    },

    #[error("day {day} question {index} has no options")]
    EmptyQuestion { day: DayNumber, index: usize },

    #[error("day {day} question {index} marks option {correct} correct but has {options} options")]
    CorrectOptionOutOfRange {
        day: DayNumber,
        index: usize,
        correct: usize,
        options: usize,
    },
}

//
// ─── DAYS ──────────────────────────────────────────────────────────────────────
//

/// Multiple-choice question attached to a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options` of the correct answer.
    pub correct_option: usize,
}

/// Static content of one course day: a topic, a video and an optional quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapDay {
    pub day_number: DayNumber,
    pub topic: String,
    pub video_ref: String,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
}

impl RoadmapDay {
    #[must_use]
    pub fn new(day_number: DayNumber, topic: impl Into<String>, video_ref: impl Into<String>) -> Self {
        Self {
            day_number,
            topic: topic.into(),
            video_ref: video_ref.into(),
            quiz: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_quiz(mut self, quiz: Vec<QuizQuestion>) -> Self {
        self.quiz = quiz;
        self
    }

    #[must_use]
    pub fn has_quiz(&self) -> bool {
        !self.quiz.is_empty()
    }
}

//
// ─── ROADMAP ───────────────────────────────────────────────────────────────────
//

/// Ordered, immutable list of days for a course.
///
/// Day numbers are exactly `1..=total_days`, so a day's predecessor is always
/// `day - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Roadmap {
    course_id: CourseId,
    days: Vec<RoadmapDay>,
}

impl Roadmap {
    /// Validate and build a roadmap.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::Empty` for a course without days,
    /// `RoadmapError::OutOfSequence` when day numbers do not run `1..=N`,
    /// and question errors for malformed quizzes.
    pub fn new(course_id: CourseId, mut days: Vec<RoadmapDay>) -> Result<Self, RoadmapError> {
        if days.is_empty() {
            return Err(RoadmapError::Empty);
        }
        days.sort_by_key(|d| d.day_number);

        for (expected, day) in (1..).zip(&days) {
            if day.day_number != expected {
                return Err(RoadmapError::OutOfSequence {
                    expected,
                    found: day.day_number,
                });
            }
            for (index, question) in day.quiz.iter().enumerate() {
                if question.options.is_empty() {
                    return Err(RoadmapError::EmptyQuestion {
                        day: day.day_number,
                        index,
                    });
                }
                if question.correct_option >= question.options.len() {
                    return Err(RoadmapError::CorrectOptionOutOfRange {
                        day: day.day_number,
                        index,
                        correct: question.correct_option,
                        options: question.options.len(),
                    });
                }
            }
        }

        Ok(Self { course_id, days })
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn days(&self) -> &[RoadmapDay] {
        &self.days
    }

    #[must_use]
    pub fn day(&self, day: DayNumber) -> Option<&RoadmapDay> {
        let index = usize::try_from(day.checked_sub(1)?).ok()?;
        self.days.get(index)
    }

    #[must_use]
    pub fn contains(&self, day: DayNumber) -> bool {
        self.day(day).is_some()
    }

    #[must_use]
    pub fn total_days(&self) -> u32 {
        u32::try_from(self.days.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn has_quiz(&self, day: DayNumber) -> bool {
        self.day(day).is_some_and(RoadmapDay::has_quiz)
    }
}
