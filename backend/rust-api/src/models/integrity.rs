use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Integrity monitor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Inactive,
    Acquiring,
    Active,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PermissionDenied,
    CameraUnavailable,
    CameraLost,
    FaceNotDetected,
    SampleTimedOut,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::PermissionDenied => "permission_denied",
            ViolationKind::CameraUnavailable => "camera_unavailable",
            ViolationKind::CameraLost => "camera_lost",
            ViolationKind::FaceNotDetected => "face_not_detected",
            ViolationKind::SampleTimedOut => "sample_timed_out",
        }
    }
}

/// A timestamped integrity finding. Append-only within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
        }
    }
}

/// Sent from the sampling task to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    pub state: MonitorState,
    pub violation: Option<Violation>,
}
