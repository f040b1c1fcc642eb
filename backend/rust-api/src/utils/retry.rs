use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    fn delay(&self, backoff: Duration) -> Duration {
        match self.jitter_max {
            Some(jitter_max) if !jitter_max.is_zero() => {
                let jitter_ms = jitter_max.as_millis() as u64;
                backoff + Duration::from_millis(rand::random_range(0..=jitter_ms))
            }
            _ => backoff,
        }
    }
}

/// Runs `f` until it succeeds, `should_retry` rejects the error, or
/// `max_attempts` calls have been made. Backoff doubles up to `max_backoff`.
pub async fn retry_async_with_config<F, Fut, T, E, P>(
    config: RetryConfig,
    mut f: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left -= 1;
                if attempts_left == 0 || !should_retry(&e) {
                    return Err(e);
                }

                tokio::time::sleep(config.delay(backoff)).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
