use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    FaceDetected,
    NoFace,
}

/// Capability request for a camera. Consumed only by the integrity monitor.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// A live camera feed that can be sampled for presence.
#[async_trait]
pub trait FrameSource: Send {
    async fn sample_presence(&mut self) -> Result<Presence, CameraError>;

    /// Releases the underlying device. Called exactly once by [`CameraLease`].
    fn release(&mut self);
}

/// Owns an acquired frame source and releases it when dropped, including
/// when the owning task is aborted mid-sample.
pub struct CameraLease {
    source: Option<Box<dyn FrameSource>>,
}

impl CameraLease {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub async fn sample_presence(&mut self) -> Result<Presence, CameraError> {
        match self.source.as_mut() {
            Some(source) => source.sample_presence().await,
            None => Err(CameraError::Lost("camera already released".to_string())),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            tracing::debug!("Camera released");
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy)]
struct PresenceReport {
    face_detected: bool,
    received_at: Instant,
}

/// Camera whose frames are analysed by the candidate's client.
///
/// The client declares the permission outcome once and then pushes
/// face-detection results through a [`PresenceReporter`]. A report older than
/// `stale_after` counts as a lost camera.
pub struct ReportedCamera {
    permission: Result<(), CameraError>,
    reports: watch::Receiver<Option<PresenceReport>>,
    stale_after: Duration,
}

/// Write side of a [`ReportedCamera`].
#[derive(Clone)]
pub struct PresenceReporter {
    tx: watch::Sender<Option<PresenceReport>>,
}

impl PresenceReporter {
    pub fn report(&self, face_detected: bool) {
        self.tx.send_replace(Some(PresenceReport {
            face_detected,
            received_at: Instant::now(),
        }));
    }
}

impl ReportedCamera {
    pub fn new(
        granted: bool,
        reason: Option<String>,
        stale_after: Duration,
    ) -> (Self, PresenceReporter) {
        let (tx, reports) = watch::channel(None);
        let permission = if granted {
            Ok(())
        } else {
            Err(CameraError::PermissionDenied(
                reason.unwrap_or_else(|| "denied by candidate".to_string()),
            ))
        };

        (
            Self {
                permission,
                reports,
                stale_after,
            },
            PresenceReporter { tx },
        )
    }
}

#[async_trait]
impl CameraDevice for ReportedCamera {
    async fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        self.permission.clone()?;
        Ok(Box::new(ReportedFrames {
            reports: self.reports.clone(),
            stale_after: self.stale_after,
            acquired_at: Instant::now(),
        }))
    }
}

struct ReportedFrames {
    reports: watch::Receiver<Option<PresenceReport>>,
    stale_after: Duration,
    acquired_at: Instant,
}

#[async_trait]
impl FrameSource for ReportedFrames {
    async fn sample_presence(&mut self) -> Result<Presence, CameraError> {
        let latest = *self.reports.borrow();
        match latest {
            Some(report) if report.received_at.elapsed() <= self.stale_after => {
                if report.face_detected {
                    Ok(Presence::FaceDetected)
                } else {
                    Ok(Presence::NoFace)
                }
            }
            Some(_) => Err(CameraError::Lost("presence reports stopped".to_string())),
            // Grace period before the client sends its first report
            None if self.acquired_at.elapsed() <= self.stale_after => Ok(Presence::FaceDetected),
            None => Err(CameraError::Lost("no presence report received".to_string())),
        }
    }

    fn release(&mut self) {}
}
