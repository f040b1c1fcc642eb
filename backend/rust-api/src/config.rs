use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub tick_interval_ms: u64,
    pub sampling_interval_secs: u64,
    pub sample_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub presence_stale_after_secs: u64,
    pub max_violations: Option<u32>,
    pub assessments_dir: Option<String>,
    pub assessments_url: Option<String>,
    pub assessments_fetch_attempts: usize,
    pub submission_url: Option<String>,
    pub submission_timeout_ms: u64,
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            tick_interval_ms: 1000,
            sampling_interval_secs: 5,
            sample_timeout_ms: 2000,
            acquire_timeout_ms: 10_000,
            presence_stale_after_secs: 15,
            max_violations: None,
            assessments_dir: None,
            assessments_url: None,
            assessments_fetch_attempts: 3,
            submission_url: None,
            submission_timeout_ms: 5000,
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Local .env is optional
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let tick_interval_ms = positive_or(
            settings.get_int("timer.tick_interval_ms").ok(),
            defaults.tick_interval_ms,
        );
        let sampling_interval_secs = positive_or(
            settings.get_int("monitor.sampling_interval_secs").ok(),
            defaults.sampling_interval_secs,
        );
        let sample_timeout_ms = positive_or(
            settings.get_int("monitor.sample_timeout_ms").ok(),
            defaults.sample_timeout_ms,
        );
        let acquire_timeout_ms = positive_or(
            settings.get_int("monitor.acquire_timeout_ms").ok(),
            defaults.acquire_timeout_ms,
        );
        let presence_stale_after_secs = positive_or(
            settings.get_int("monitor.presence_stale_after_secs").ok(),
            defaults.presence_stale_after_secs,
        );

        let max_violations = settings
            .get_int("policy.max_violations")
            .ok()
            .or_else(|| env::var("MAX_VIOLATIONS").ok().and_then(|v| v.parse().ok()))
            .filter(|v| *v > 0)
            .map(|v| v as u32);

        let assessments_dir = settings
            .get_string("assessments.dir")
            .or_else(|_| env::var("ASSESSMENTS_DIR"))
            .ok();
        let assessments_url = settings
            .get_string("assessments.url")
            .or_else(|_| env::var("ASSESSMENTS_URL"))
            .ok();
        let assessments_fetch_attempts = positive_or(
            settings.get_int("assessments.fetch_attempts").ok(),
            defaults.assessments_fetch_attempts as u64,
        ) as usize;

        let submission_url = settings
            .get_string("submission.url")
            .or_else(|_| env::var("SUBMISSION_URL"))
            .ok();
        let submission_timeout_ms = positive_or(
            settings.get_int("submission.timeout_ms").ok(),
            defaults.submission_timeout_ms,
        );

        let otlp_endpoint = settings
            .get_string("telemetry.otlp_endpoint")
            .or_else(|_| env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .ok();

        Ok(Config {
            bind_addr,
            tick_interval_ms,
            sampling_interval_secs,
            sample_timeout_ms,
            acquire_timeout_ms,
            presence_stale_after_secs,
            max_violations,
            assessments_dir,
            assessments_url,
            assessments_fetch_attempts,
            submission_url,
            submission_timeout_ms,
            otlp_endpoint,
        })
    }
}

fn positive_or(value: Option<i64>, default: u64) -> u64 {
    value.filter(|v| *v > 0).map(|v| v as u64).unwrap_or(default)
}
