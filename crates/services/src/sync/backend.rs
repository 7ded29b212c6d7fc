use std::env;
use std::fmt;

use async_trait::async_trait;
use course_core::model::{CourseId, DayNumber};

use super::wire::{ProgressPayload, QuizSubmission, SubmissionRecord};
use crate::error::SyncError;

/// Opaque bearer credential supplied by the authentication layer.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Returns `None` for blank tokens.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.trim().to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

/// Source of the current bearer credential.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<BearerToken>;
}

/// Fixed credential, or none.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials(Option<BearerToken>);

impl StaticCredentials {
    #[must_use]
    pub fn new(token: Option<BearerToken>) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self(None)
    }

    /// Reads `LEARN_API_TOKEN`.
    #[must_use]
    pub fn from_env() -> Self {
        Self(env::var("LEARN_API_TOKEN").ok().and_then(BearerToken::new))
    }
}

impl CredentialSource for StaticCredentials {
    fn bearer_token(&self) -> Option<BearerToken> {
        self.0.clone()
    }
}

/// Transport-level contract of the enrollment-progress backend.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Fetch authoritative progress; `Ok(None)` when the learner has none yet.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` for transport, status or decoding failures.
    async fn get_progress(
        &self,
        token: &BearerToken,
        course: CourseId,
    ) -> Result<Option<ProgressPayload>, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError` for transport, status or conflict failures.
    async fn put_progress(
        &self,
        token: &BearerToken,
        course: CourseId,
        payload: &ProgressPayload,
    ) -> Result<(), SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError::Conflict` when the backend reports a duplicate or
    /// stale submission, other `SyncError`s for transport failures.
    async fn post_quiz_submission(
        &self,
        token: &BearerToken,
        submission: &QuizSubmission,
    ) -> Result<SubmissionRecord, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError` for transport, status or decoding failures.
    async fn get_quiz_submissions(
        &self,
        token: &BearerToken,
        course: CourseId,
        day: DayNumber,
    ) -> Result<Vec<SubmissionRecord>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_absent() {
        assert!(BearerToken::new("   ").is_none());
        let token = BearerToken::new(" abc ").unwrap();
        assert_eq!(token.as_str(), "abc");
        assert_eq!(format!("{token:?}"), "BearerToken(..)");
        assert!(StaticCredentials::anonymous().bearer_token().is_none());
    }
}
