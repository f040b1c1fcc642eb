use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::SourceError;
use crate::models::{Assessment, RawAssessment};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Supplies the immutable question sequence and time budget for a session.
#[async_trait]
pub trait AssessmentSource: Send + Sync {
    async fn load(&self, assessment_id: &str) -> Result<Assessment, SourceError>;
}

#[derive(Default)]
pub struct InMemoryAssessmentSource {
    assessments: HashMap<String, Assessment>,
}

impl InMemoryAssessmentSource {
    pub fn new(assessments: impl IntoIterator<Item = Assessment>) -> Self {
        Self {
            assessments: assessments
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
        }
    }
}

#[async_trait]
impl AssessmentSource for InMemoryAssessmentSource {
    async fn load(&self, assessment_id: &str) -> Result<Assessment, SourceError> {
        self.assessments
            .get(assessment_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(assessment_id.to_string()))
    }
}

/// Reads `{dir}/{assessment_id}.json` documents.
pub struct JsonDirectorySource {
    dir: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl AssessmentSource for JsonDirectorySource {
    async fn load(&self, assessment_id: &str) -> Result<Assessment, SourceError> {
        if !is_safe_id(assessment_id) {
            return Err(SourceError::NotFound(assessment_id.to_string()));
        }

        let path = self.dir.join(format!("{}.json", assessment_id));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(assessment_id.to_string()))
            }
            Err(e) => return Err(SourceError::Unavailable(e.to_string())),
        };

        let raw: RawAssessment =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed {
                id: assessment_id.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Loaded assessment {} from {}", assessment_id, path.display());
        Ok(raw.into())
    }
}

/// Fetches `GET {base_url}/assessments/{id}` with retries on transport errors
/// and 5xx responses.
pub struct HttpAssessmentSource {
    http_client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpAssessmentSource {
    pub fn new(base_url: String, attempts: usize) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig {
                max_attempts: attempts.max(1),
                ..RetryConfig::default()
            },
        }
    }

    async fn fetch_once(&self, assessment_id: &str) -> Result<Option<RawAssessment>, SourceError> {
        let url = format!("{}/assessments/{}", self.base_url, assessment_id);
        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let raw = response
                    .json::<RawAssessment>()
                    .await
                    .map_err(|e| SourceError::Malformed {
                        id: assessment_id.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(raw))
            }
            status => Err(SourceError::Unavailable(format!(
                "assessment service returned {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl AssessmentSource for HttpAssessmentSource {
    async fn load(&self, assessment_id: &str) -> Result<Assessment, SourceError> {
        let fetched = retry_async_with_config(
            self.retry.clone(),
            || self.fetch_once(assessment_id),
            // Malformed documents do not get better on retry
            |e| matches!(e, SourceError::Unavailable(_)),
        )
        .await?;

        match fetched {
            Some(raw) => Ok(raw.into()),
            None => Err(SourceError::NotFound(assessment_id.to_string())),
        }
    }
}
