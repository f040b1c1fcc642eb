use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod integrity;
pub mod timer;

use crate::models::integrity::{MonitorState, Violation};
use crate::services::countdown::TimerPhase;
use crate::services::progress::ProgressSnapshot;
use crate::services::renderer::CaptureSurface;

/// Captured answers keyed by question id. Absence of an entry means unanswered.
pub type AnswerMap = BTreeMap<String, String>;

/// One question of an assessment. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: u32,
}

/// Declared question type, carrying only the data each type needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QuestionKind {
    SingleChoice { options: Vec<String> },
    FreeText,
    Code { starter: Option<String> },
    SimulatedVideo,
}

impl QuestionKind {
    pub fn label(&self) -> &'static str {
        match self {
            QuestionKind::SingleChoice { .. } => "single-choice",
            QuestionKind::FreeText => "free-text",
            QuestionKind::Code { .. } => "code",
            QuestionKind::SimulatedVideo => "simulated-video",
        }
    }
}

/// Loose wire form of a question as delivered by an assessment source.
///
/// Converting into [`Question`] never fails: unknown types fall back to
/// single-choice, malformed option lists become empty and unreadable points
/// count as 1. A missing id is filled in from the question's position when
/// the whole assessment is converted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuestion {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, alias = "question")]
    pub prompt: String,
    #[serde(default, rename = "type")]
    pub question_type: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub points: Option<serde_json::Value>,
    #[serde(default, alias = "starterCode")]
    pub starter_code: Option<serde_json::Value>,
}

impl From<RawQuestion> for Question {
    fn from(raw: RawQuestion) -> Self {
        let kind = match raw.question_type.as_deref().map(str::trim) {
            Some("text") | Some("free-text") | Some("free_text") => QuestionKind::FreeText,
            Some("code") | Some("coding") => QuestionKind::Code {
                starter: raw.starter_code.and_then(parse_starter),
            },
            Some("video") | Some("simulated-video") | Some("simulated_video") => {
                QuestionKind::SimulatedVideo
            }
            _ => QuestionKind::SingleChoice {
                options: raw.options.map(parse_options).unwrap_or_default(),
            },
        };

        Question {
            id: parse_id(raw.id).unwrap_or_default(),
            prompt: raw.prompt,
            kind,
            points: raw.points.and_then(parse_points).unwrap_or(1),
        }
    }
}

fn parse_id(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_points(value: serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_options(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => {
            let options: Option<Vec<String>> = items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            options.unwrap_or_default()
        }
        // Options stored as a JSON-encoded string
        serde_json::Value::String(encoded) => {
            serde_json::from_str::<Vec<String>>(&encoded).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn parse_starter(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }
}

/// Immutable question sequence and time budget supplied before a session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub time_limit_seconds: u32,
    pub questions: Vec<Question>,
}

/// Wire form of an assessment document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAssessment {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "duration_seconds")]
    pub time_limit_seconds: u32,
    #[serde(default)]
    pub questions: Vec<RawQuestion>,
}

impl From<RawAssessment> for Assessment {
    fn from(raw: RawAssessment) -> Self {
        Assessment {
            id: raw.id,
            title: raw.title,
            time_limit_seconds: raw.time_limit_seconds,
            questions: raw
                .questions
                .into_iter()
                .enumerate()
                .map(|(index, raw)| {
                    let mut question = Question::from(raw);
                    if question.id.is_empty() {
                        question.id = format!("q{}", index + 1);
                    }
                    question
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    UnderReview,
    Submitted,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Submitted | SessionStatus::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::UnderReview => "under_review",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Expired => "expired",
        }
    }
}

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Confirmation,
    Expiry,
    Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    NotRequested,
    InFlight,
    Delivered,
    Failed { error: String },
}

/// Tuple handed to the submission sink exactly once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub session_id: String,
    pub assessment_id: String,
    pub answers: AnswerMap,
    pub elapsed_seconds: u32,
    pub violations: Vec<Violation>,
    pub ended_by: EndReason,
    pub answered_count: usize,
    pub question_count: usize,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub question_type: &'static str,
    pub points: u32,
    pub surface: CaptureSurface,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerView {
    pub total_seconds: u32,
    pub elapsed_seconds: u32,
    pub remaining_seconds: u32,
    pub phase: TimerPhase,
    pub display: String,
}

/// Read-only projection of a session, re-derived after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub assessment_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub current_index: usize,
    pub question_count: usize,
    pub answered_count: usize,
    pub question: QuestionView,
    pub progress: ProgressSnapshot,
    pub timer: TimerView,
    pub monitor: MonitorState,
    pub violations: Vec<Violation>,
    pub submission: SubmissionState,
    pub ended_by: Option<EndReason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub assessment_id: String,
    pub candidate_id: Option<String>,
    pub camera: Option<CameraDeclaration>,
}

/// Camera permission outcome as observed by the candidate's client.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraDeclaration {
    pub granted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NavigateRequest {
    To { to: usize },
    Step { direction: Direction },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CaptureAnswerRequest {
    Select { select: usize },
    Text { text: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceReportRequest {
    pub face_detected: bool,
}
