use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use course_core::model::{CourseId, DayNumber, LearnerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Cache entries are scoped to one learner in one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub learner: LearnerId,
    pub course: CourseId,
}

impl CacheKey {
    #[must_use]
    pub fn new(learner: LearnerId, course: CourseId) -> Self {
        Self { learner, course }
    }
}

/// Locally cached progress: enough to rebuild the UI before the server answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProgress {
    pub watched: BTreeSet<DayNumber>,
    pub completed: BTreeSet<DayNumber>,
}

/// Where the learner left off in the course viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub last_viewed_day: Option<DayNumber>,
    pub quiz_view_open: bool,
}

/// Durable per-learner, per-course progress store.
///
/// Writes overwrite the previous entry as a whole.
#[async_trait]
pub trait ProgressCache: Send + Sync {
    /// Load cached progress, empty when nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    async fn load_progress(&self, key: CacheKey) -> Result<CachedProgress, StorageError>;

    /// Replace cached progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be written.
    async fn save_progress(&self, key: CacheKey, progress: &CachedProgress)
    -> Result<(), StorageError>;

    /// Drop cached progress and view state for the key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be removed.
    async fn clear(&self, key: CacheKey) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    async fn load_view_state(&self, key: CacheKey) -> Result<ViewState, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be written.
    async fn save_view_state(&self, key: CacheKey, state: ViewState) -> Result<(), StorageError>;
}

/// In-memory cache for tests and for running without a database.
#[derive(Clone, Default)]
pub struct InMemoryProgressCache {
    progress: Arc<Mutex<HashMap<CacheKey, CachedProgress>>>,
    views: Arc<Mutex<HashMap<CacheKey, ViewState>>>,
}

impl InMemoryProgressCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressCache for InMemoryProgressCache {
    async fn load_progress(&self, key: CacheKey) -> Result<CachedProgress, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&key).cloned().unwrap_or_default())
    }

    async fn save_progress(
        &self,
        key: CacheKey,
        progress: &CachedProgress,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key, progress.clone());
        Ok(())
    }

    async fn clear(&self, key: CacheKey) -> Result<(), StorageError> {
        self.progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .remove(&key);
        self.views
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .remove(&key);
        Ok(())
    }

    async fn load_view_state(&self, key: CacheKey) -> Result<ViewState, StorageError> {
        let guard = self
            .views
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&key).copied().unwrap_or_default())
    }

    async fn save_view_state(&self, key: CacheKey, state: ViewState) -> Result<(), StorageError> {
        let mut guard = self
            .views
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key, state);
        Ok(())
    }
}

/// Storage handles behind trait objects so the backend can be swapped.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressCache>,
}
