use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::services::assessment_source::{
    AssessmentSource, HttpAssessmentSource, InMemoryAssessmentSource, JsonDirectorySource,
};
use crate::services::integrity_monitor::MonitorConfig;
use crate::services::policy::{RecordOnly, SubmitAfter, ViolationPolicy};
use crate::services::registry::SessionRegistry;
use crate::services::session_runner::RunnerDeps;
use crate::services::submission::{HttpSubmissionSink, InMemorySubmissionSink, SubmissionSink};

pub struct AppState {
    pub config: Config,
    pub source: Arc<dyn AssessmentSource>,
    pub sink: Arc<dyn SubmissionSink>,
    pub policy: Arc<dyn ViolationPolicy>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Builds the state from configuration: JSON directory or HTTP assessment
    /// source, HTTP or in-memory submission sink.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let source: Arc<dyn AssessmentSource> =
            match (&config.assessments_dir, &config.assessments_url) {
                (Some(dir), _) => {
                    tracing::info!("Loading assessments from directory {}", dir);
                    Arc::new(JsonDirectorySource::new(dir))
                }
                (None, Some(url)) => {
                    tracing::info!("Loading assessments from {}", url);
                    Arc::new(HttpAssessmentSource::new(
                        url.clone(),
                        config.assessments_fetch_attempts,
                    ))
                }
                (None, None) => {
                    anyhow::bail!("either assessments.dir or assessments.url must be set")
                }
            };

        let sink: Arc<dyn SubmissionSink> = match &config.submission_url {
            Some(url) => {
                tracing::info!("Submitting finished sessions to {}", url);
                Arc::new(HttpSubmissionSink::new(
                    url.clone(),
                    Duration::from_millis(config.submission_timeout_ms),
                ))
            }
            None => {
                tracing::warn!("submission.url not set; finished sessions are kept in memory");
                Arc::new(InMemorySubmissionSink::new())
            }
        };

        Ok(Self::with_collaborators(config, source, sink))
    }

    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn AssessmentSource>,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        let policy: Arc<dyn ViolationPolicy> = match config.max_violations {
            Some(limit) => Arc::new(SubmitAfter {
                limit: limit as usize,
            }),
            None => Arc::new(RecordOnly),
        };

        Self {
            config,
            source,
            sink,
            policy,
            sessions: SessionRegistry::new(),
        }
    }

    /// State with an empty in-memory source and sink.
    pub fn in_memory(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(InMemoryAssessmentSource::default()),
            Arc::new(InMemorySubmissionSink::new()),
        )
    }

    pub fn runner_deps(&self) -> RunnerDeps {
        RunnerDeps {
            sink: self.sink.clone(),
            policy: self.policy.clone(),
            camera: None,
            tick_interval: Duration::from_millis(self.config.tick_interval_ms),
            monitor: MonitorConfig {
                sampling_interval: Duration::from_secs(self.config.sampling_interval_secs),
                sample_timeout: Duration::from_millis(self.config.sample_timeout_ms),
                acquire_timeout: Duration::from_millis(self.config.acquire_timeout_ms),
            },
        }
    }
}

pub mod assessment_source;
pub mod camera;
pub mod countdown;
pub mod integrity_monitor;
pub mod policy;
pub mod progress;
pub mod registry;
pub mod renderer;
pub mod session_runner;
pub mod session_service;
pub mod submission;
