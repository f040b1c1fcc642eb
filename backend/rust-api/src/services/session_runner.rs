//! One task per session. The task is the only owner of the [`Session`]; the
//! countdown, monitor events, submission results and host commands are
//! serialised through a single `select!` loop, with the countdown polled first
//! so expiry wins any race against a manual action in the same turn.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::error::{SessionError, SubmissionError};
use crate::metrics::{ANSWERS_CAPTURED_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::integrity::{MonitorEvent, MonitorState};
use crate::models::timer::{TimeExpired, TimerEvent, TimerTick};
use crate::models::{EndReason, SessionStatus, SessionView, SubmissionState};
use crate::services::camera::CameraDevice;
use crate::services::integrity_monitor::{MonitorConfig, MonitorHandle};
use crate::services::policy::{PolicyDecision, ViolationPolicy};
use crate::services::renderer::CaptureInput;
use crate::services::session_service::{CaptureOutcome, Session, SessionEvent};
use crate::services::submission::{self, SubmissionSink};

const COMMAND_BUFFER: usize = 32;
const MONITOR_BUFFER: usize = 16;
const TIMER_EVENT_BUFFER: usize = 64;

/// Collaborators and tuning for one session task.
#[derive(Clone)]
pub struct RunnerDeps {
    pub sink: Arc<dyn SubmissionSink>,
    pub policy: Arc<dyn ViolationPolicy>,
    pub camera: Option<Arc<dyn CameraDevice>>,
    pub tick_interval: Duration,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    To(usize),
    Next,
    Previous,
}

#[derive(Debug)]
enum Command {
    Start,
    Navigate(Navigation),
    Capture(CaptureInput),
    Finish,
    Submit,
    Cancel,
}

type Reply = oneshot::Sender<Result<SessionView, SessionError>>;

struct Request {
    command: Command,
    reply: Reply,
}

/// Cheap, cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<Request>,
    view: watch::Receiver<SessionView>,
    timer_events: broadcast::Sender<TimerEvent>,
}

impl SessionHandle {
    /// Spawns the session task. The session stays `not_started` until
    /// [`SessionHandle::start`].
    pub fn spawn(session: Session, deps: RunnerDeps) -> Self {
        let id = session.id().to_string();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(session.view());
        let (timer_tx, _) = broadcast::channel(TIMER_EVENT_BUFFER);
        let (done_tx, done_rx) = mpsc::channel(1);

        let runner = SessionRunner {
            session,
            deps,
            ticker: None,
            monitor: None,
            monitor_events: None,
            submissions_tx: done_tx,
            pending_submits: Vec::new(),
            view_tx,
            timer_tx: timer_tx.clone(),
            closed: false,
        };
        tokio::spawn(runner.run(commands_rx, done_rx));

        Self {
            id,
            commands: commands_tx,
            view: view_rx,
            timer_events: timer_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published view. Still available after the task has ended.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// View receiver that reports an error from `changed()` once the session
    /// task has stopped.
    pub fn view_updates(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn subscribe_timer(&self) -> broadcast::Receiver<TimerEvent> {
        self.timer_events.subscribe()
    }

    /// Resolves once the session task has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn start(&self) -> Result<SessionView, SessionError> {
        self.request(Command::Start).await
    }

    pub async fn navigate(&self, navigation: Navigation) -> Result<SessionView, SessionError> {
        self.request(Command::Navigate(navigation)).await
    }

    pub async fn capture(&self, input: CaptureInput) -> Result<SessionView, SessionError> {
        self.request(Command::Capture(input)).await
    }

    pub async fn finish(&self) -> Result<SessionView, SessionError> {
        self.request(Command::Finish).await
    }

    /// Confirms submission and waits for the sink's answer. Repeated calls
    /// join the outstanding submission instead of starting another.
    pub async fn submit(&self) -> Result<SessionView, SessionError> {
        self.request(Command::Submit).await
    }

    /// Leaves the session: stops the countdown and releases the camera.
    pub async fn cancel(&self) -> Result<SessionView, SessionError> {
        self.request(Command::Cancel).await
    }

    async fn request(&self, command: Command) -> Result<SessionView, SessionError> {
        let (reply, response) = oneshot::channel();
        let kind = CommandKind::of(&command);

        if self.commands.send(Request { command, reply }).await.is_err() {
            return self.after_close(kind);
        }
        match response.await {
            Ok(result) => result,
            Err(_) => self.after_close(kind),
        }
    }

    /// Answers commands that reach a task which has already stopped.
    fn after_close(&self, kind: CommandKind) -> Result<SessionView, SessionError> {
        let view = self.view();
        match (view.status, kind) {
            // Duplicate confirms and late edits on a finished session are no-ops
            (SessionStatus::Submitted, CommandKind::Submit | CommandKind::Capture) => Ok(view),
            (status, _) if status.is_terminal() => Err(SessionError::InvalidState(status)),
            _ => Err(SessionError::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Submit,
    Capture,
    Other,
}

impl CommandKind {
    fn of(command: &Command) -> Self {
        match command {
            Command::Submit => CommandKind::Submit,
            Command::Capture(_) => CommandKind::Capture,
            _ => CommandKind::Other,
        }
    }
}

struct SessionRunner {
    session: Session,
    deps: RunnerDeps,
    ticker: Option<Interval>,
    monitor: Option<MonitorHandle>,
    monitor_events: Option<mpsc::Receiver<MonitorEvent>>,
    submissions_tx: mpsc::Sender<Result<(), SubmissionError>>,
    pending_submits: Vec<Reply>,
    view_tx: watch::Sender<SessionView>,
    timer_tx: broadcast::Sender<TimerEvent>,
    closed: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_monitor_event(
    events: &mut Option<mpsc::Receiver<MonitorEvent>>,
) -> Option<MonitorEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionRunner {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Request>,
        mut submissions: mpsc::Receiver<Result<(), SubmissionError>>,
    ) {
        tracing::debug!("Session task running: id={}", self.session.id());

        loop {
            let flow = tokio::select! {
                biased;

                _ = next_tick(&mut self.ticker) => {
                    self.on_tick().await;
                    Flow::Continue
                }
                Some(result) = submissions.recv() => {
                    self.on_submission_done(result);
                    Flow::Continue
                }
                event = next_monitor_event(&mut self.monitor_events) => {
                    match event {
                        Some(event) => self.on_monitor_event(event),
                        // Monitor task finished (e.g. camera never acquired)
                        None => self.monitor_events = None,
                    }
                    Flow::Continue
                }
                request = commands.recv() => match request {
                    Some(request) => self.on_request(request).await,
                    None => {
                        tracing::info!("All handles dropped: session={}", self.session.id());
                        Flow::Stop
                    }
                },
            };

            self.publish_view();

            if flow == Flow::Stop || self.session.status() == SessionStatus::Submitted {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn on_tick(&mut self) {
        match self.session.advance(self.deps.tick_interval) {
            Some(SessionEvent::Ticked { remaining }) => {
                tracing::debug!(
                    "Timer tick: session={}, remaining={}s",
                    self.session.id(),
                    remaining
                );
                self.broadcast_tick();
            }
            Some(SessionEvent::Expired) => self.on_expired().await,
            None => {}
        }
        if !self.session.is_ticking() {
            self.ticker = None;
        }
    }

    async fn on_expired(&mut self) {
        self.ticker = None;
        SESSIONS_TOTAL.with_label_values(&["expired"]).inc();

        let _ = self.timer_tx.send(TimerEvent::TimeExpired(TimeExpired {
            session_id: self.session.id().to_string(),
            answered_count: self.session.answers().len(),
            timestamp: Utc::now(),
            message: "Time limit exceeded".to_string(),
        }));

        self.stop_monitor().await;
        self.submit(EndReason::Expiry, None);
    }

    fn broadcast_tick(&self) {
        let countdown = self.session.countdown();
        // No receivers is fine
        let _ = self.timer_tx.send(TimerEvent::TimerTick(TimerTick {
            session_id: self.session.id().to_string(),
            remaining_seconds: countdown.remaining_seconds(),
            elapsed_seconds: countdown.elapsed_seconds(),
            total_seconds: countdown.total_seconds(),
            phase: countdown.phase(),
            display: countdown.display(),
            timestamp: Utc::now(),
        }));
    }

    fn on_monitor_event(&mut self, event: MonitorEvent) {
        self.session.set_monitor_state(event.state);

        let Some(violation) = event.violation else {
            return;
        };
        if !self.session.record_violation(violation.clone()) {
            return;
        }

        let decision = self
            .deps
            .policy
            .evaluate(&violation, self.session.violations());
        // Only the first forced attempt; a failed one waits for a manual retry
        if decision == PolicyDecision::ForceSubmit
            && !self.session.status().is_terminal()
            && *self.session.submission() == SubmissionState::NotRequested
        {
            tracing::warn!(
                "Violation policy forces submission: session={}, violations={}",
                self.session.id(),
                self.session.violations().len()
            );
            self.submit(EndReason::Policy, None);
        }
    }

    async fn on_request(&mut self, request: Request) -> Flow {
        let Request { command, reply } = request;

        match command {
            Command::Start => {
                let result = self.start().await;
                let _ = reply.send(result.map(|_| self.session.view()));
            }
            Command::Navigate(navigation) => {
                let result = match navigation {
                    Navigation::To(index) => self.session.go_to(index),
                    Navigation::Next => self.session.next(),
                    Navigation::Previous => self.session.previous(),
                };
                let _ = reply.send(result.map(|_| self.session.view()));
            }
            Command::Capture(input) => {
                let question_type = self.session.current_question().kind.label();
                let result = self.session.capture(input);
                if let Ok(CaptureOutcome::Applied { question_id }) = &result {
                    ANSWERS_CAPTURED_TOTAL
                        .with_label_values(&[question_type])
                        .inc();
                    tracing::debug!(
                        "Answer captured: session={}, question={}",
                        self.session.id(),
                        question_id
                    );
                }
                let _ = reply.send(result.map(|_| self.session.view()));
            }
            Command::Finish => {
                let result = self.session.finish();
                let _ = reply.send(result.map(|_| self.session.view()));
            }
            Command::Submit => self.submit(EndReason::Confirmation, Some(reply)),
            Command::Cancel => {
                tracing::info!("Session cancelled: id={}", self.session.id());
                if !self.session.status().is_terminal() {
                    SESSIONS_TOTAL.with_label_values(&["cancelled"]).inc();
                }
                self.shutdown().await;
                let _ = reply.send(Ok(self.session.view()));
                return Flow::Stop;
            }
        }

        Flow::Continue
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        let event = self.session.start()?;
        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        SESSIONS_ACTIVE.inc();

        if let Some(camera) = self.deps.camera.clone() {
            let (events_tx, events_rx) = mpsc::channel(MONITOR_BUFFER);
            self.monitor = Some(MonitorHandle::spawn(
                self.session.id().to_string(),
                camera,
                self.deps.monitor.clone(),
                events_tx,
            ));
            self.monitor_events = Some(events_rx);
            self.session.set_monitor_state(MonitorState::Acquiring);
        }

        if event == Some(SessionEvent::Expired) {
            self.on_expired().await;
            return Ok(());
        }

        let period = self.deps.tick_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        self.ticker = Some(ticker);
        Ok(())
    }

    /// Starts a submission unless one is already running or delivered.
    fn submit(&mut self, reason: EndReason, reply: Option<Reply>) {
        match self.session.begin_submission(reason) {
            Ok(Some(payload)) => {
                tracing::info!(
                    "Submitting session: id={}, reason={:?}, answered={}",
                    payload.session_id,
                    payload.ended_by,
                    payload.answered_count
                );
                self.pending_submits.extend(reply);

                let sink = self.deps.sink.clone();
                let done = self.submissions_tx.clone();
                tokio::spawn(async move {
                    let result = submission::deliver(sink.as_ref(), &payload).await;
                    let _ = done.send(result).await;
                });
            }
            Ok(None) => {
                if let Some(reply) = reply {
                    if *self.session.submission() == SubmissionState::InFlight {
                        self.pending_submits.push(reply);
                    } else {
                        let _ = reply.send(Ok(self.session.view()));
                    }
                }
            }
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn on_submission_done(&mut self, result: Result<(), SubmissionError>) {
        self.session.complete_submission(result.clone());
        if result.is_ok() {
            SESSIONS_TOTAL.with_label_values(&["submitted"]).inc();
        }

        let view = self.session.view();
        for reply in self.pending_submits.drain(..) {
            let _ = reply.send(match &result {
                Ok(()) => Ok(view.clone()),
                Err(e) => Err(SessionError::Submission(e.clone())),
            });
        }
    }

    async fn stop_monitor(&mut self) {
        self.monitor_events = None;
        if let Some(monitor) = self.monitor.take() {
            monitor.disable().await;
            self.session.set_monitor_state(MonitorState::Inactive);
            tracing::debug!("Integrity monitor disabled: session={}", self.session.id());
        }
    }

    /// Runs on every exit path: submission, cancel, dropped handles.
    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ticker = None;
        self.stop_monitor().await;
        if self.session.started_at().is_some() {
            SESSIONS_ACTIVE.dec();
        }
        self.publish_view();
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(self.session.view());
    }
}
