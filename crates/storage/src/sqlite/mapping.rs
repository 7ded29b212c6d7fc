use std::collections::BTreeSet;

use course_core::model::DayNumber;

use crate::repository::{CacheKey, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

/// Bind values for the `(learner_id, course_id)` primary key.
pub(crate) fn key_to_i64(key: CacheKey) -> Result<(i64, i64), StorageError> {
    Ok((
        id_i64("learner_id", key.learner.value())?,
        id_i64("course_id", key.course.value())?,
    ))
}

/// Day sets are stored as JSON arrays, ascending.
pub(crate) fn days_to_json(days: &BTreeSet<DayNumber>) -> Result<String, StorageError> {
    serde_json::to_string(days).map_err(ser)
}

pub(crate) fn days_from_json(field: &'static str, raw: &str) -> Result<BTreeSet<DayNumber>, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

pub(crate) fn day_from_i64(v: i64) -> Result<DayNumber, StorageError> {
    DayNumber::try_from(v)
        .ok()
        .filter(|d| *d >= 1)
        .ok_or_else(|| StorageError::Serialization(format!("invalid day number: {v}")))
}
