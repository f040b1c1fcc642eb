#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assessment_session::{
    config::Config,
    create_router,
    error::{CameraError, SubmissionError},
    models::{Assessment, Question, QuestionKind, SubmissionPayload},
    services::{
        assessment_source::InMemoryAssessmentSource,
        camera::{CameraDevice, FrameSource, Presence},
        integrity_monitor::MonitorConfig,
        policy::{RecordOnly, ViolationPolicy},
        session_runner::RunnerDeps,
        submission::{InMemorySubmissionSink, SubmissionSink},
        AppState,
    },
};
use async_trait::async_trait;
use axum::Router;
use tokio::sync::Mutex;

pub const ASSESSMENT_ID: &str = "backend-basics";
pub const EMPTY_ASSESSMENT_ID: &str = "empty";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Single-choice, free-text and code questions.
pub fn sample_assessment(time_limit_seconds: u32) -> Assessment {
    Assessment {
        id: ASSESSMENT_ID.to_string(),
        title: "Backend basics".to_string(),
        time_limit_seconds,
        questions: vec![
            Question {
                id: "q1".to_string(),
                prompt: "Which status code means Created?".to_string(),
                kind: QuestionKind::SingleChoice {
                    options: vec!["200".to_string(), "201".to_string(), "204".to_string()],
                },
                points: 1,
            },
            Question {
                id: "q2".to_string(),
                prompt: "Explain idempotency.".to_string(),
                kind: QuestionKind::FreeText,
                points: 2,
            },
            Question {
                id: "q3".to_string(),
                prompt: "Implement fizzbuzz.".to_string(),
                kind: QuestionKind::Code {
                    starter: Some("// TODO".to_string()),
                },
                points: 3,
            },
        ],
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub sink: Arc<InMemorySubmissionSink>,
}

pub fn create_test_app() -> TestApp {
    init_tracing();

    let source = InMemoryAssessmentSource::new(vec![
        sample_assessment(600),
        Assessment {
            id: EMPTY_ASSESSMENT_ID.to_string(),
            title: "Nothing here".to_string(),
            time_limit_seconds: 60,
            questions: vec![],
        },
    ]);
    let sink = Arc::new(InMemorySubmissionSink::new());
    let state = Arc::new(AppState::with_collaborators(
        Config::default(),
        Arc::new(source),
        sink.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        sink,
    }
}

pub fn runner_deps(sink: Arc<dyn SubmissionSink>) -> RunnerDeps {
    RunnerDeps {
        sink,
        policy: Arc::new(RecordOnly),
        camera: None,
        tick_interval: Duration::from_secs(1),
        monitor: MonitorConfig::default(),
    }
}

pub fn with_policy(mut deps: RunnerDeps, policy: Arc<dyn ViolationPolicy>) -> RunnerDeps {
    deps.policy = policy;
    deps
}

/// Rejects the first `failures` submissions, then stores payloads.
pub struct FlakySink {
    failures_left: AtomicUsize,
    pub delivered: Mutex<Vec<SubmissionPayload>>,
    pub calls: AtomicUsize,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            delivered: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SubmissionSink for FlakySink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SubmissionError::Rejected {
                status: 503,
                body: "recorder unavailable".to_string(),
            });
        }
        self.delivered.lock().await.push(payload.clone());
        Ok(())
    }
}

/// Takes `delay` to accept each payload.
pub struct SlowSink {
    pub delay: Duration,
    pub inner: InMemorySubmissionSink,
}

#[async_trait]
impl SubmissionSink for SlowSink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), SubmissionError> {
        tokio::time::sleep(self.delay).await;
        self.inner.submit(payload).await
    }
}

/// Camera that always yields `presence` and counts releases.
pub struct FakeCamera {
    pub presence: Presence,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(presence: Presence) -> Self {
        Self {
            presence,
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFrames {
            presence: self.presence,
            released: self.released.clone(),
        }))
    }
}

struct FakeFrames {
    presence: Presence,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn sample_presence(&mut self) -> Result<Presence, CameraError> {
        Ok(self.presence)
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
