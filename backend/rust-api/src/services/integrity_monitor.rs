//! Camera-based integrity monitor.
//!
//! [`IntegrityMonitor`] is the pure state machine; [`MonitorHandle::spawn`]
//! runs it on its own task so a slow camera never stalls the countdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::error::CameraError;
use crate::metrics::INTEGRITY_VIOLATIONS_TOTAL;
use crate::models::integrity::{MonitorEvent, MonitorState, Violation, ViolationKind};
use crate::services::camera::{CameraDevice, CameraLease, Presence};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub sampling_interval: Duration,
    pub sample_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(5),
            sample_timeout: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one presence sample, including failures of the sample itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    Present,
    Absent,
    Lost(String),
    TimedOut,
}

impl From<Result<Presence, CameraError>> for SampleOutcome {
    fn from(result: Result<Presence, CameraError>) -> Self {
        match result {
            Ok(Presence::FaceDetected) => SampleOutcome::Present,
            Ok(Presence::NoFace) => SampleOutcome::Absent,
            Err(e) => SampleOutcome::Lost(e.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct IntegrityMonitor {
    state: MonitorState,
    sampling: bool,
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self {
            state: MonitorState::Inactive,
            sampling: false,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Whether a sampling interval should currently be scheduled.
    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    /// `inactive -> acquiring`. Returns false if already enabled.
    pub fn enable(&mut self) -> bool {
        if self.state != MonitorState::Inactive {
            return false;
        }
        self.state = MonitorState::Acquiring;
        true
    }

    /// `acquiring -> active`; sampling starts.
    pub fn acquired(&mut self) {
        if self.state == MonitorState::Acquiring {
            self.state = MonitorState::Active;
            self.sampling = true;
        }
    }

    /// `acquiring -> degraded`, reporting the failure once. No sampling is
    /// scheduled afterwards.
    pub fn acquisition_failed(&mut self, error: &CameraError) -> Option<Violation> {
        if self.state != MonitorState::Acquiring {
            return None;
        }
        self.state = MonitorState::Degraded;
        self.sampling = false;

        let kind = match error {
            CameraError::PermissionDenied(_) => ViolationKind::PermissionDenied,
            CameraError::Unavailable(_) | CameraError::Lost(_) => ViolationKind::CameraUnavailable,
        };
        Some(Violation::new(kind, error.to_string(), Utc::now()))
    }

    /// Applies one sample. Failed samples degrade the monitor and produce a
    /// violation; a good sample returns to `active` without clearing anything.
    pub fn sample(&mut self, outcome: SampleOutcome) -> Option<Violation> {
        if !self.sampling {
            return None;
        }

        let violation = match outcome {
            SampleOutcome::Present => None,
            SampleOutcome::Absent => Some(Violation::new(
                ViolationKind::FaceNotDetected,
                "Face not detected",
                Utc::now(),
            )),
            SampleOutcome::Lost(reason) => Some(Violation::new(
                ViolationKind::CameraLost,
                format!("Camera lost: {}", reason),
                Utc::now(),
            )),
            SampleOutcome::TimedOut => Some(Violation::new(
                ViolationKind::SampleTimedOut,
                "Presence sample timed out",
                Utc::now(),
            )),
        };

        self.state = if violation.is_some() {
            MonitorState::Degraded
        } else {
            MonitorState::Active
        };
        violation
    }

    /// Any state `-> inactive`.
    pub fn disable(&mut self) {
        self.state = MonitorState::Inactive;
        self.sampling = false;
    }
}

/// Running monitor task. Dropping the handle aborts the task, which drops the
/// camera lease and releases the device.
pub struct MonitorHandle {
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<MonitorState>,
}

impl MonitorHandle {
    /// Enables a monitor for `camera`; events are delivered on `events`.
    pub fn spawn(
        session_id: String,
        camera: Arc<dyn CameraDevice>,
        config: MonitorConfig,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(MonitorState::Inactive);
        let task = tokio::spawn(run_monitor(session_id, camera, config, events, state_tx));
        Self {
            task: Some(task),
            state: state_rx,
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Cancels sampling and waits until the camera has been released.
    pub async fn disable(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_monitor(
    session_id: String,
    camera: Arc<dyn CameraDevice>,
    config: MonitorConfig,
    events: mpsc::Sender<MonitorEvent>,
    state: watch::Sender<MonitorState>,
) {
    let mut monitor = IntegrityMonitor::new();
    monitor.enable();
    state.send_replace(monitor.state());

    let acquired = match timeout(config.acquire_timeout, camera.acquire()).await {
        Ok(result) => result,
        Err(_) => Err(CameraError::Unavailable(
            "camera acquisition timed out".to_string(),
        )),
    };

    let mut lease = match acquired {
        Ok(source) => {
            monitor.acquired();
            CameraLease::new(source)
        }
        Err(e) => {
            let violation = monitor.acquisition_failed(&e);
            tracing::warn!(
                "Camera acquisition failed: session={}, error={}",
                session_id,
                e
            );
            publish(&session_id, &events, &state, &monitor, violation).await;
            return;
        }
    };

    tracing::info!("Integrity monitor active: session={}", session_id);
    publish(&session_id, &events, &state, &monitor, None).await;

    let mut ticker = interval_at(
        Instant::now() + config.sampling_interval,
        config.sampling_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while monitor.is_sampling() {
        ticker.tick().await;

        let outcome = match timeout(config.sample_timeout, lease.sample_presence()).await {
            Ok(result) => SampleOutcome::from(result),
            Err(_) => SampleOutcome::TimedOut,
        };
        tracing::debug!(
            "Presence sample: session={}, outcome={:?}",
            session_id,
            outcome
        );

        let previous = monitor.state();
        let violation = monitor.sample(outcome);
        let changed = violation.is_some() || previous != monitor.state();
        // Session owner is gone
        if changed && !publish(&session_id, &events, &state, &monitor, violation).await {
            break;
        }
    }

    lease.release();
    monitor.disable();
    state.send_replace(monitor.state());
}

async fn publish(
    session_id: &str,
    events: &mpsc::Sender<MonitorEvent>,
    state: &watch::Sender<MonitorState>,
    monitor: &IntegrityMonitor,
    violation: Option<Violation>,
) -> bool {
    state.send_replace(monitor.state());

    if let Some(v) = &violation {
        INTEGRITY_VIOLATIONS_TOTAL
            .with_label_values(&[v.kind.as_str()])
            .inc();
        tracing::warn!(
            "Integrity violation: session={}, kind={:?}, message={}",
            session_id,
            v.kind,
            v.message
        );
    }

    events
        .send(MonitorEvent {
            state: monitor.state(),
            violation,
        })
        .await
        .is_ok()
}
