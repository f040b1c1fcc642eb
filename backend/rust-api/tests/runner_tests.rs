use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assessment_session::{
    error::SessionError,
    models::{EndReason, SessionStatus, SubmissionState},
    services::{
        renderer::CaptureInput,
        session_runner::{Navigation, RunnerDeps, SessionHandle},
        session_service::Session,
        submission::InMemorySubmissionSink,
    },
};

mod common;

use common::{runner_deps, sample_assessment, FlakySink, SlowSink};

fn spawn(time_limit_seconds: u32, deps: RunnerDeps) -> SessionHandle {
    let session = Session::new("s-1", sample_assessment(time_limit_seconds)).unwrap();
    SessionHandle::spawn(session, deps)
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_whatever_was_answered() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(10, runner_deps(sink.clone()));

    tokio_test::assert_ok!(handle.start().await);
    tokio_test::assert_ok!(handle.capture(CaptureInput::Select { option: 1 }).await);
    let view = handle.navigate(Navigation::Next).await.unwrap();
    assert_eq!(view.current_index, 1);

    handle.closed().await;

    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Submitted);
    assert_eq!(view.ended_by, Some(EndReason::Expiry));
    assert_eq!(view.timer.remaining_seconds, 0);

    let payloads = sink.payloads().await;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].answered_count, 1);
    assert_eq!(payloads[0].answers.get("q1").map(String::as_str), Some("201"));
    assert!(!payloads[0].answers.contains_key("q2"));
    assert!(!payloads[0].answers.contains_key("q3"));
}

#[tokio::test(start_paused = true)]
async fn timer_stream_ends_with_time_expired() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(3, runner_deps(sink));
    let mut events = handle.subscribe_timer();

    handle.start().await.unwrap();

    let mut names = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        names.push(event.event_name());
        if event.event_name() == "time-expired" {
            break;
        }
    }
    assert_eq!(names, vec!["timer-tick", "timer-tick", "time-expired"]);
}

#[tokio::test(start_paused = true)]
async fn manual_actions_after_expiry_are_no_ops() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(2, runner_deps(sink.clone()));
    handle.start().await.unwrap();
    handle.closed().await;

    let view = handle.submit().await.unwrap();
    assert_eq!(view.ended_by, Some(EndReason::Expiry));
    assert!(handle
        .capture(CaptureInput::Edit {
            text: "late".into()
        })
        .await
        .is_ok());
    assert_eq!(sink.payloads().await.len(), 1);
    assert_eq!(handle.view().answered_count, 0);
}

#[tokio::test(start_paused = true)]
async fn zero_budget_expires_on_start() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(0, runner_deps(sink.clone()));

    handle.start().await.unwrap();
    handle.closed().await;

    assert_eq!(handle.view().status, SessionStatus::Submitted);
    assert_eq!(sink.payloads().await[0].ended_by, EndReason::Expiry);
}

#[tokio::test(start_paused = true)]
async fn duplicate_confirms_share_one_submission() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_secs(2),
        inner: InMemorySubmissionSink::new(),
    });
    let handle = spawn(600, runner_deps(sink.clone()));
    handle.start().await.unwrap();

    let (first, second) = tokio::join!(handle.submit(), handle.submit());
    assert_eq!(first.unwrap().status, SessionStatus::Submitted);
    assert_eq!(second.unwrap().status, SessionStatus::Submitted);
    assert_eq!(sink.inner.payloads().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_keeps_session_open_for_retry() {
    let sink = Arc::new(FlakySink::new(1));
    let handle = spawn(600, runner_deps(sink.clone()));
    handle.start().await.unwrap();
    handle.finish().await.unwrap();

    let err = handle.submit().await.unwrap_err();
    assert!(matches!(err, SessionError::Submission(_)));

    let view = handle.view();
    assert_eq!(view.status, SessionStatus::UnderReview);
    assert!(matches!(view.submission, SubmissionState::Failed { .. }));

    let view = handle.submit().await.unwrap();
    assert_eq!(view.status, SessionStatus::Submitted);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.delivered.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sub_second_tick_interval_keeps_the_full_budget() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let mut deps = runner_deps(sink.clone());
    deps.tick_interval = Duration::from_millis(250);
    let handle = spawn(10, deps);

    let started = tokio::time::Instant::now();
    handle.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(9500)).await;
    let view = handle.view();
    assert_eq!(view.status, SessionStatus::InProgress);
    assert_eq!(view.timer.elapsed_seconds, 9);
    assert!(sink.payloads().await.is_empty());

    handle.closed().await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Submitted);
    assert_eq!(view.ended_by, Some(EndReason::Expiry));
}

#[tokio::test(start_paused = true)]
async fn countdown_keeps_ticking_while_submission_is_outstanding() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_secs(5),
        inner: InMemorySubmissionSink::new(),
    });
    let handle = spawn(600, runner_deps(sink));
    handle.start().await.unwrap();

    let submitter = handle.clone();
    let pending = tokio::spawn(async move { submitter.submit().await });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let view = handle.view();
    assert_eq!(view.submission, SubmissionState::InFlight);
    assert!(view.timer.elapsed_seconds >= 3);

    let view = pending.await.unwrap().unwrap();
    assert_eq!(view.status, SessionStatus::Submitted);
}

#[tokio::test(start_paused = true)]
async fn navigation_is_bounded_and_review_allows_amending() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(600, runner_deps(sink));

    assert!(matches!(
        handle.navigate(Navigation::Next).await,
        Err(SessionError::NotStarted)
    ));
    handle.start().await.unwrap();

    assert!(matches!(
        handle.navigate(Navigation::To(3)).await,
        Err(SessionError::QuestionOutOfRange { index: 3, count: 3 })
    ));
    let view = handle.navigate(Navigation::Previous).await.unwrap();
    assert_eq!(view.current_index, 0);

    let view = handle.finish().await.unwrap();
    assert_eq!(view.status, SessionStatus::UnderReview);

    handle.navigate(Navigation::To(1)).await.unwrap();
    let view = handle
        .capture(CaptureInput::Edit {
            text: "same request, same effect".into(),
        })
        .await
        .unwrap();
    assert_eq!(view.answered_count, 1);
    assert_eq!(view.status, SessionStatus::UnderReview);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_session() {
    let sink = Arc::new(InMemorySubmissionSink::new());
    let handle = spawn(600, runner_deps(sink.clone()));
    handle.start().await.unwrap();

    handle.cancel().await.unwrap();
    handle.closed().await;
    assert!(handle.is_closed());

    tokio::time::sleep(Duration::from_secs(700)).await;
    assert!(sink.payloads().await.is_empty());
    assert!(matches!(
        handle.navigate(Navigation::Next).await,
        Err(SessionError::Closed)
    ));
}
