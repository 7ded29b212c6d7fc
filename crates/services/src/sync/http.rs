use std::env;
use std::time::Duration;

use async_trait::async_trait;
use course_core::model::{CourseId, DayNumber};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::backend::{BearerToken, ProgressBackend};
use super::wire::{ProgressPayload, QuizSubmission, SubmissionRecord};
use crate::error::{ConflictCode, SyncError};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Extra tries after a connect or timeout error.
    pub network_retries: u8,
}

impl SyncConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            network_retries: 1,
        }
    }

    /// Reads `LEARN_API_BASE_URL` and `LEARN_API_TIMEOUT_SECS`.
    ///
    /// Returns `None` when no base URL is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("LEARN_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let timeout = env::var("LEARN_API_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Some(Self {
            timeout: Duration::from_secs(timeout),
            ..Self::new(base_url.trim())
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// `ProgressBackend` over the REST API.
#[derive(Clone)]
pub struct HttpProgressBackend {
    client: Client,
    config: SyncConfig,
}

impl HttpProgressBackend {
    /// # Errors
    ///
    /// Returns `SyncError::Http` if the HTTP client cannot be built.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, SyncError> {
        let mut retries_left = self.config.network_retries;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) if retries_left > 0 && (err.is_connect() || err.is_timeout()) => {
                    retries_left -= 1;
                    warn!(error = %err, "progress backend unreachable, retrying once");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Error body; deployments use either `code` or `error` for the reason.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_code(self) -> Option<String> {
        self.code.or(self.error)
    }
}

/// Map a non-success response onto a typed error.
async fn error_for(response: Response) -> SyncError {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.ok();
    classify(status, body)
}

fn classify(status: StatusCode, body: Option<ErrorBody>) -> SyncError {
    let code = body.and_then(ErrorBody::into_code).map(|code| ConflictCode::parse(&code));
    match (status, code) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => SyncError::NotAuthenticated,
        (StatusCode::CONFLICT, code) => {
            SyncError::Conflict(code.unwrap_or(ConflictCode::AlreadyCompleted))
        }
        // some deployments report duplicates as 400 with a code
        (StatusCode::BAD_REQUEST, Some(ConflictCode::AlreadyCompleted)) => {
            SyncError::Conflict(ConflictCode::AlreadyCompleted)
        }
        (status, _) => SyncError::HttpStatus(status),
    }
}

#[async_trait]
impl ProgressBackend for HttpProgressBackend {
    async fn get_progress(
        &self,
        token: &BearerToken,
        course: CourseId,
    ) -> Result<Option<ProgressPayload>, SyncError> {
        let url = self.config.url(&format!("enrollments/{course}/progress"));
        let response = self
            .send(|| self.client.get(&url).bearer_auth(token.as_str()))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%course, "no enrollment progress on backend");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(Some(response.json().await?))
    }

    async fn put_progress(
        &self,
        token: &BearerToken,
        course: CourseId,
        payload: &ProgressPayload,
    ) -> Result<(), SyncError> {
        let url = self.config.url(&format!("enrollments/{course}/progress"));
        let response = self
            .send(|| self.client.put(&url).bearer_auth(token.as_str()).json(payload))
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }

    async fn post_quiz_submission(
        &self,
        token: &BearerToken,
        submission: &QuizSubmission,
    ) -> Result<SubmissionRecord, SyncError> {
        let url = self.config.url("quiz-submissions");
        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .bearer_auth(token.as_str())
                    .header("Idempotency-Key", submission.idempotency_key.to_string())
                    .json(submission)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_quiz_submissions(
        &self,
        token: &BearerToken,
        course: CourseId,
        day: DayNumber,
    ) -> Result<Vec<SubmissionRecord>, SyncError> {
        let url = self.config.url("quiz-submissions");
        let response = self
            .send(|| {
                self.client
                    .get(&url)
                    .bearer_auth(token.as_str())
                    .query(&[("courseId", course.value()), ("dayNumber", u64::from(day))])
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(response.json().await?)
    }
}
