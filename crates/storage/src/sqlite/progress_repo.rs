use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{day_from_i64, days_from_json, days_to_json, key_to_i64, ser};
use crate::repository::{CacheKey, CachedProgress, ProgressCache, StorageError, ViewState};

#[async_trait]
impl ProgressCache for SqliteRepository {
    async fn load_progress(&self, key: CacheKey) -> Result<CachedProgress, StorageError> {
        let (learner_id, course_id) = key_to_i64(key)?;
        let row = sqlx::query(
            r"
            SELECT watched_days, completed_days
            FROM course_progress_cache
            WHERE learner_id = ?1 AND course_id = ?2
            ",
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(CachedProgress::default());
        };

        let watched: String = row.try_get("watched_days").map_err(ser)?;
        let completed: String = row.try_get("completed_days").map_err(ser)?;
        Ok(CachedProgress {
            watched: days_from_json("watched_days", &watched)?,
            completed: days_from_json("completed_days", &completed)?,
        })
    }

    async fn save_progress(
        &self,
        key: CacheKey,
        progress: &CachedProgress,
    ) -> Result<(), StorageError> {
        let (learner_id, course_id) = key_to_i64(key)?;
        sqlx::query(
            r"
            INSERT INTO course_progress_cache (
                learner_id, course_id, watched_days, completed_days, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(learner_id, course_id) DO UPDATE SET
                watched_days = excluded.watched_days,
                completed_days = excluded.completed_days,
                updated_at = excluded.updated_at
            ",
        )
        .bind(learner_id)
        .bind(course_id)
        .bind(days_to_json(&progress.watched)?)
        .bind(days_to_json(&progress.completed)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, key: CacheKey) -> Result<(), StorageError> {
        let (learner_id, course_id) = key_to_i64(key)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        for table in ["course_progress_cache", "course_view_state"] {
            let sql = format!("DELETE FROM {table} WHERE learner_id = ?1 AND course_id = ?2");
            sqlx::query(&sql)
                .bind(learner_id)
                .bind(course_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn load_view_state(&self, key: CacheKey) -> Result<ViewState, StorageError> {
        let (learner_id, course_id) = key_to_i64(key)?;
        let row = sqlx::query(
            r"
            SELECT last_viewed_day, quiz_view_open
            FROM course_view_state
            WHERE learner_id = ?1 AND course_id = ?2
            ",
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(ViewState::default());
        };

        let last_viewed_day = row
            .try_get::<Option<i64>, _>("last_viewed_day")
            .map_err(ser)?
            .map(day_from_i64)
            .transpose()?;
        let quiz_view_open: bool = row.try_get("quiz_view_open").map_err(ser)?;
        Ok(ViewState {
            last_viewed_day,
            quiz_view_open,
        })
    }

    async fn save_view_state(&self, key: CacheKey, state: ViewState) -> Result<(), StorageError> {
        let (learner_id, course_id) = key_to_i64(key)?;
        sqlx::query(
            r"
            INSERT INTO course_view_state (
                learner_id, course_id, last_viewed_day, quiz_view_open
            )
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(learner_id, course_id) DO UPDATE SET
                last_viewed_day = excluded.last_viewed_day,
                quiz_view_open = excluded.quiz_view_open
            ",
        )
        .bind(learner_id)
        .bind(course_id)
        .bind(state.last_viewed_day.map(i64::from))
        .bind(state.quiz_view_open)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
