use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, DayNumber, EnrollmentProgress, EnrollmentStatus, QuizAttempt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// Body of `GET`/`PUT enrollment-progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub completed_days: BTreeSet<DayNumber>,
    pub progress: u8,
    pub status: EnrollmentStatus,
}

impl From<&EnrollmentProgress> for ProgressPayload {
    fn from(value: &EnrollmentProgress) -> Self {
        Self {
            completed_days: value.completed_days.clone(),
            progress: value.progress_percent,
            status: value.status,
        }
    }
}

/// Body of `POST quiz-submission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub course_id: CourseId,
    pub day_number: DayNumber,
    pub answers: Vec<Option<usize>>,
    pub score: u8,
    pub total_questions: u32,
    pub attempt_number: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_retake: bool,
    /// Same key for the first try and its override retry.
    pub idempotency_key: Uuid,
}

/// Attempt record as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub day_number: DayNumber,
    pub attempt_number: u32,
    pub score: u8,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    /// Convert into a domain attempt, using `fallback_time` when the backend
    /// omitted the timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Decode` for out-of-range scores or attempt numbers.
    pub fn into_attempt(self, fallback_time: DateTime<Utc>) -> Result<QuizAttempt, SyncError> {
        QuizAttempt::new(
            self.day_number,
            self.attempt_number,
            self.score,
            self.total_questions,
            self.submitted_at.unwrap_or(fallback_time),
        )
        .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;

    #[test]
    fn submission_omits_force_flag_unless_set() {
        let mut submission = QuizSubmission {
            course_id: CourseId::new(4),
            day_number: 2,
            answers: vec![Some(1), None],
            score: 50,
            total_questions: 2,
            attempt_number: 1,
            force_retake: false,
            idempotency_key: Uuid::nil(),
        };
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["courseId"], 4);
        assert_eq!(json["answers"], serde_json::json!([1, null]));
        assert!(json.get("forceRetake").is_none());

        submission.force_retake = true;
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["forceRetake"], true);
    }

    #[test]
    fn progress_payload_uses_backend_field_names() {
        let payload: ProgressPayload = serde_json::from_str(
            r#"{"completedDays": [2, 1], "progress": 40, "status": "started"}"#,
        )
        .unwrap();
        assert_eq!(payload.completed_days, BTreeSet::from([1, 2]));
        assert_eq!(payload.status, EnrollmentStatus::Started);
    }

    #[test]
    fn records_with_bad_scores_fail_to_decode() {
        let record = SubmissionRecord {
            day_number: 1,
            attempt_number: 1,
            score: 140,
            total_questions: 3,
            submitted_at: None,
        };
        assert!(matches!(
            record.into_attempt(fixed_now()),
            Err(SyncError::Decode(_))
        ));
    }
}
