use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    handlers::reject,
    models::{
        CaptureAnswerRequest, CreateSessionRequest, Direction, NavigateRequest,
        PresenceReportRequest,
    },
    services::{
        camera::ReportedCamera,
        registry::SessionEntry,
        renderer::CaptureInput,
        session_runner::{Navigation, SessionHandle},
        session_service::Session,
        AppState,
    },
};

/// POST /api/v1/sessions
///
/// Loads the assessment, spawns the session task and starts the countdown.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Creating session for assessment_id={}, candidate_id={:?}",
        req.assessment_id,
        req.candidate_id
    );

    let assessment = state
        .source
        .load(&req.assessment_id)
        .await
        .map_err(|e| reject(e.into()))?;
    let session = Session::new(Uuid::new_v4().to_string(), assessment).map_err(reject)?;

    let mut deps = state.runner_deps();
    let presence = req.camera.map(|camera| {
        let (device, reporter) = ReportedCamera::new(
            camera.granted,
            camera.reason,
            Duration::from_secs(state.config.presence_stale_after_secs),
        );
        deps.camera = Some(Arc::new(device));
        reporter
    });

    let handle = SessionHandle::spawn(session, deps);
    let view = handle.start().await.map_err(reject)?;
    state.sessions.insert(SessionEntry { handle, presence }).await;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    Ok((StatusCode::OK, Json(entry.handle.view())))
}

pub async fn navigate(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<NavigateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let navigation = match req {
        NavigateRequest::To { to } => Navigation::To(to),
        NavigateRequest::Step {
            direction: Direction::Next,
        } => Navigation::Next,
        NavigateRequest::Step {
            direction: Direction::Previous,
        } => Navigation::Previous,
    };

    let view = entry.handle.navigate(navigation).await.map_err(reject)?;
    Ok((StatusCode::OK, Json(view)))
}

/// POST /api/v1/sessions/{id}/answers
///
/// Applies the input to the current question.
pub async fn capture_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<CaptureAnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let input = match req {
        CaptureAnswerRequest::Select { select } => CaptureInput::Select { option: select },
        CaptureAnswerRequest::Text { text } => CaptureInput::Edit { text },
    };

    let view = entry.handle.capture(input).await.map_err(reject)?;
    Ok((StatusCode::OK, Json(view)))
}

pub async fn finish_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Finishing session: {}", session_id);
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let view = entry.handle.finish().await.map_err(reject)?;
    Ok((StatusCode::OK, Json(view)))
}

/// POST /api/v1/sessions/{id}/submit
///
/// Waits for the submission sink. A failed delivery leaves the session as it
/// was so the candidate can retry.
pub async fn submit_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Submitting session: {}", session_id);
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let view = entry.handle.submit().await.map_err(reject)?;
    Ok((StatusCode::OK, Json(view)))
}

pub async fn report_presence(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<PresenceReportRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let Some(presence) = entry.presence else {
        return Err((
            StatusCode::CONFLICT,
            "camera monitoring is not enabled for this session".to_string(),
        ));
    };

    presence.report(req.face_detected);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/sessions/{id}
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    let view = entry.handle.cancel().await.map_err(reject)?;
    state.sessions.remove(&session_id).await;

    tracing::info!("Session removed: {}", session_id);
    Ok((StatusCode::OK, Json(view)))
}
