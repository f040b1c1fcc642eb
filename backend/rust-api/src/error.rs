use axum::http::StatusCode;
use thiserror::Error;

use crate::models::SessionStatus;

/// Errors raised by the session orchestrator and its runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("assessment has no questions")]
    EmptyAssessment,
    #[error("session has not started")]
    NotStarted,
    #[error("session already started")]
    AlreadyStarted,
    #[error("question index {index} out of range (0..{count})")]
    QuestionOutOfRange { index: usize, count: usize },
    #[error("action not allowed while session is {0:?}")]
    InvalidState(SessionStatus),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::EmptyAssessment => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::NotStarted
            | SessionError::AlreadyStarted
            | SessionError::InvalidState(_)
            | SessionError::Closed => StatusCode::CONFLICT,
            SessionError::QuestionOutOfRange { .. } => StatusCode::BAD_REQUEST,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Submission(_) => StatusCode::BAD_GATEWAY,
            SessionError::Source(e) => e.status_code(),
        }
    }
}

/// Failure delivering a finished session to the submission sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("submission rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("submission sink unreachable: {0}")]
    Unreachable(String),
}

impl From<reqwest::Error> for SubmissionError {
    fn from(err: reqwest::Error) -> Self {
        SubmissionError::Unreachable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("assessment not found: {0}")]
    NotFound(String),
    #[error("malformed assessment {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("assessment source failed: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SourceError::NotFound(_) => StatusCode::NOT_FOUND,
            SourceError::Malformed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SourceError::Unavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// Camera acquisition and sampling failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera lost: {0}")]
    Lost(String),
}
