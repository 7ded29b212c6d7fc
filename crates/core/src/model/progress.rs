use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::roadmap::DayNumber;

/// Enrollment status derived from the progress percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Started,
    Completed,
}

impl EnrollmentStatus {
    #[must_use]
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0 => Self::Enrolled,
            100..=u8::MAX => Self::Completed,
            _ => Self::Started,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }
}

/// `round(100 * completed / total)`, half rounded up; 0 for an empty course.
#[must_use]
pub fn progress_percent(completed: usize, total_days: u32) -> u8 {
    if total_days == 0 {
        return 0;
    }
    let total = u64::from(total_days);
    let completed = u64::try_from(completed).unwrap_or(u64::MAX).min(total);
    let scaled = (200 * completed + total) / (2 * total);
    u8::try_from(scaled).unwrap_or(100)
}

/// True when every day in `days` has its predecessor in `days` too.
#[must_use]
pub fn is_prefix_contiguous(days: &BTreeSet<DayNumber>) -> bool {
    days.iter().copied().zip(1..).all(|(day, expected)| day == expected)
}

/// The longest run `1, 2, .., k` contained in `days`.
#[must_use]
pub fn contiguous_prefix(days: &BTreeSet<DayNumber>) -> BTreeSet<DayNumber> {
    days.iter()
        .copied()
        .zip(1..)
        .take_while(|(day, expected)| day == expected)
        .map(|(day, _)| day)
        .collect()
}

/// Aggregate progress pushed to and pulled from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentProgress {
    pub completed_days: BTreeSet<DayNumber>,
    pub progress_percent: u8,
    pub status: EnrollmentStatus,
}

impl EnrollmentProgress {
    #[must_use]
    pub fn compute(completed_days: &BTreeSet<DayNumber>, total_days: u32) -> Self {
        let progress_percent = progress_percent(completed_days.len(), total_days);
        Self {
            completed_days: completed_days.clone(),
            progress_percent,
            status: EnrollmentStatus::from_percent(progress_percent),
        }
    }
}
