//! Session orchestrator: owns the answer map, the current position and the
//! countdown, and converts the session into a single submission.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{SessionError, SubmissionError};
use crate::models::integrity::{MonitorState, Violation};
use crate::models::{
    AnswerMap, Assessment, EndReason, Question, QuestionView, SessionStatus, SessionView,
    SubmissionPayload, SubmissionState, TimerView,
};
use crate::services::countdown::{Countdown, TickOutcome};
use crate::services::progress::ProgressSnapshot;
use crate::services::renderer::{self, CaptureInput};

/// State change the owner has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ticked { remaining: u32 },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Applied { question_id: String },
    /// Input did not fit the question type.
    Ignored,
    /// Answers are frozen (terminal state or submission in flight).
    Discarded,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    assessment: Assessment,
    index: usize,
    answers: AnswerMap,
    countdown: Countdown,
    status: SessionStatus,
    violations: Vec<Violation>,
    monitor_state: MonitorState,
    submission: SubmissionState,
    ended_by: Option<EndReason>,
    started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, assessment: Assessment) -> Result<Self, SessionError> {
        if assessment.questions.is_empty() {
            return Err(SessionError::EmptyAssessment);
        }
        let countdown = Countdown::new(assessment.time_limit_seconds);

        Ok(Self {
            id: id.into(),
            assessment,
            index: 0,
            answers: AnswerMap::new(),
            countdown,
            status: SessionStatus::NotStarted,
            violations: Vec::new(),
            monitor_state: MonitorState::Inactive,
            submission: SubmissionState::NotRequested,
            ended_by: None,
            started_at: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn question_count(&self) -> usize {
        self.assessment.questions.len()
    }

    pub fn current_question(&self) -> &Question {
        &self.assessment.questions[self.index]
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn submission(&self) -> &SubmissionState {
        &self.submission
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// The countdown runs while the session is active or awaiting review.
    pub fn is_ticking(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::InProgress | SessionStatus::UnderReview
        )
    }

    /// `not_started -> in_progress`. A zero budget expires right away.
    pub fn start(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        if self.status != SessionStatus::NotStarted {
            return Err(SessionError::AlreadyStarted);
        }
        self.status = SessionStatus::InProgress;
        self.index = 0;
        self.started_at = Some(Utc::now());

        tracing::info!(
            "Session started: id={}, assessment={}, questions={}, budget={}s",
            self.id,
            self.assessment.id,
            self.question_count(),
            self.countdown.total_seconds()
        );

        match self.countdown.begin() {
            Some(TickOutcome::Expired) => Ok(Some(self.expire())),
            _ => Ok(None),
        }
    }

    /// Accounts for one second of countdown.
    pub fn tick(&mut self) -> Option<SessionEvent> {
        self.advance(Duration::from_secs(1))
    }

    /// Accounts for one countdown period of length `period`.
    pub fn advance(&mut self, period: Duration) -> Option<SessionEvent> {
        if !self.is_ticking() {
            return None;
        }
        match self.countdown.advance(period) {
            TickOutcome::Running { remaining } => Some(SessionEvent::Ticked { remaining }),
            TickOutcome::Expired => Some(self.expire()),
            TickOutcome::Stopped => None,
        }
    }

    fn expire(&mut self) -> SessionEvent {
        self.status = SessionStatus::Expired;
        if self.ended_by.is_none() {
            self.ended_by = Some(EndReason::Expiry);
        }
        tracing::info!(
            "Session expired: id={}, answered={}/{}",
            self.id,
            self.answers.len(),
            self.question_count()
        );
        SessionEvent::Expired
    }

    fn ensure_navigable(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::InProgress | SessionStatus::UnderReview => Ok(()),
            SessionStatus::NotStarted => Err(SessionError::NotStarted),
            other => Err(SessionError::InvalidState(other)),
        }
    }

    /// Moves to `index`. In review this is the jump-back path.
    pub fn go_to(&mut self, index: usize) -> Result<usize, SessionError> {
        self.ensure_navigable()?;
        if index >= self.question_count() {
            return Err(SessionError::QuestionOutOfRange {
                index,
                count: self.question_count(),
            });
        }
        self.index = index;
        Ok(self.index)
    }

    /// Advances one question, staying on the last one.
    pub fn next(&mut self) -> Result<usize, SessionError> {
        self.ensure_navigable()?;
        if self.index + 1 < self.question_count() {
            self.index += 1;
        }
        Ok(self.index)
    }

    /// Steps back one question, staying on the first one.
    pub fn previous(&mut self) -> Result<usize, SessionError> {
        self.ensure_navigable()?;
        self.index = self.index.saturating_sub(1);
        Ok(self.index)
    }

    fn answers_frozen(&self) -> bool {
        self.status.is_terminal()
            || matches!(
                self.submission,
                SubmissionState::InFlight | SubmissionState::Delivered
            )
    }

    /// Applies candidate input to the current question (last write wins).
    pub fn capture(&mut self, input: CaptureInput) -> Result<CaptureOutcome, SessionError> {
        if self.status == SessionStatus::NotStarted {
            return Err(SessionError::NotStarted);
        }
        if self.answers_frozen() {
            tracing::debug!("Discarding edit on frozen session: id={}", self.id);
            return Ok(CaptureOutcome::Discarded);
        }

        let question = self.current_question();
        match renderer::capture(question, input) {
            Some(value) => {
                let question_id = question.id.clone();
                self.answers.insert(question_id.clone(), value);
                Ok(CaptureOutcome::Applied { question_id })
            }
            None => Ok(CaptureOutcome::Ignored),
        }
    }

    /// `in_progress -> under_review`. Answers stay editable via jump-back.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::InProgress => {
                self.status = SessionStatus::UnderReview;
                tracing::info!("Session under review: id={}", self.id);
                Ok(())
            }
            SessionStatus::UnderReview => Ok(()),
            SessionStatus::NotStarted => Err(SessionError::NotStarted),
            other => Err(SessionError::InvalidState(other)),
        }
    }

    /// Freezes the answers and returns the payload for the sink.
    ///
    /// Returns `Ok(None)` when a submission is already in flight or delivered,
    /// so duplicate confirms never reach the sink twice. A failed attempt can
    /// be retried.
    pub fn begin_submission(
        &mut self,
        reason: EndReason,
    ) -> Result<Option<SubmissionPayload>, SessionError> {
        match self.submission {
            SubmissionState::InFlight | SubmissionState::Delivered => return Ok(None),
            SubmissionState::NotRequested | SubmissionState::Failed { .. } => {}
        }
        match self.status {
            SessionStatus::InProgress | SessionStatus::UnderReview | SessionStatus::Expired => {}
            SessionStatus::NotStarted => return Err(SessionError::NotStarted),
            SessionStatus::Submitted => return Ok(None),
        }

        if self.ended_by.is_none() || self.status != SessionStatus::Expired {
            self.ended_by = Some(reason);
        }
        self.submission = SubmissionState::InFlight;

        Ok(Some(SubmissionPayload {
            session_id: self.id.clone(),
            assessment_id: self.assessment.id.clone(),
            answers: self.answers.clone(),
            elapsed_seconds: self.countdown.elapsed_seconds(),
            violations: self.violations.clone(),
            ended_by: self.ended_by.unwrap_or(reason),
            answered_count: self.answers.len(),
            question_count: self.question_count(),
            submitted_at: Utc::now(),
        }))
    }

    /// Records the sink's answer. On failure the session keeps its
    /// pre-submission state so the candidate can retry.
    pub fn complete_submission(&mut self, result: Result<(), SubmissionError>) {
        match result {
            Ok(()) => {
                self.submission = SubmissionState::Delivered;
                self.status = SessionStatus::Submitted;
                tracing::info!(
                    "Session submitted: id={}, ended_by={:?}, answered={}/{}",
                    self.id,
                    self.ended_by,
                    self.answers.len(),
                    self.question_count()
                );
            }
            Err(e) => {
                tracing::warn!("Submission failed: id={}, error={}", self.id, e);
                self.submission = SubmissionState::Failed {
                    error: e.to_string(),
                };
            }
        }
    }

    /// Appends a violation. Ignored while the answers are frozen, so the
    /// view never shows violations the delivered payload lacks.
    pub fn record_violation(&mut self, violation: Violation) -> bool {
        if self.answers_frozen() {
            return false;
        }
        self.violations.push(violation);
        true
    }

    pub fn set_monitor_state(&mut self, state: MonitorState) {
        self.monitor_state = state;
    }

    pub fn view(&self) -> SessionView {
        let question = self.current_question();
        let answer = self.answers.get(&question.id).map(String::as_str);

        SessionView {
            session_id: self.id.clone(),
            assessment_id: self.assessment.id.clone(),
            title: self.assessment.title.clone(),
            status: self.status,
            current_index: self.index,
            question_count: self.question_count(),
            answered_count: self.answers.len(),
            question: QuestionView {
                id: question.id.clone(),
                prompt: question.prompt.clone(),
                question_type: question.kind.label(),
                points: question.points,
                surface: renderer::render(question, answer),
            },
            progress: ProgressSnapshot::compute(
                self.index + 1,
                self.question_count(),
                self.answers.len(),
            ),
            timer: TimerView {
                total_seconds: self.countdown.total_seconds(),
                elapsed_seconds: self.countdown.elapsed_seconds(),
                remaining_seconds: self.countdown.remaining_seconds(),
                phase: self.countdown.phase(),
                display: self.countdown.display(),
            },
            monitor: self.monitor_state,
            violations: self.violations.clone(),
            submission: self.submission.clone(),
            ended_by: self.ended_by,
        }
    }
}
