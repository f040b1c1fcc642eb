use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::error::SubmissionError;
use crate::metrics::{SUBMISSIONS_TOTAL, SUBMISSION_DURATION_SECONDS};
use crate::models::SubmissionPayload;

/// Durable recorder of finished sessions. Called at most once per successful
/// session; the core never retries on its own.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), SubmissionError>;
}

/// Keeps payloads in memory. Used when no sink URL is configured and in tests.
#[derive(Default)]
pub struct InMemorySubmissionSink {
    payloads: Mutex<Vec<SubmissionPayload>>,
}

impl InMemorySubmissionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payloads(&self) -> Vec<SubmissionPayload> {
        self.payloads.lock().await.clone()
    }
}

#[async_trait]
impl SubmissionSink for InMemorySubmissionSink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), SubmissionError> {
        self.payloads.lock().await.push(payload.clone());
        tracing::info!(
            "Submission stored in memory: session={}, answers={}",
            payload.session_id,
            payload.answered_count
        );
        Ok(())
    }
}

/// Posts the payload as JSON to an external recorder.
pub struct HttpSubmissionSink {
    http_client: Client,
    url: String,
    timeout: Duration,
}

impl HttpSubmissionSink {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            url,
            timeout,
        }
    }
}

#[async_trait]
impl SubmissionSink for HttpSubmissionSink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), SubmissionError> {
        tracing::debug!(
            "Posting submission: session={}, url={}",
            payload.session_id,
            self.url
        );

        let response = self
            .http_client
            .post(&self.url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SubmissionError::Rejected { status, body });
        }

        tracing::info!(
            "Submission accepted: session={}, status={}",
            payload.session_id,
            response.status()
        );
        Ok(())
    }
}

/// Delivers `payload` and records the outcome in the submission metrics.
pub async fn deliver(
    sink: &dyn SubmissionSink,
    payload: &SubmissionPayload,
) -> Result<(), SubmissionError> {
    let start = std::time::Instant::now();
    let result = sink.submit(payload).await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };
    SUBMISSIONS_TOTAL.with_label_values(&[status]).inc();
    SUBMISSION_DURATION_SECONDS.observe(duration);

    result
}
