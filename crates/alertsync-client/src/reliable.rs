use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use alertsync_core::{FetchError, HistoryFetcher, Identity, Message, TimeWindow};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps a `HistoryFetcher` and retries retryable failures with
/// exponential backoff and jitter. Authorization failures are returned
/// immediately.
pub struct ReliableFetcher<F: HistoryFetcher> {
    inner: F,
    config: RetryConfig,
    total_retries: AtomicU64,
}

impl<F: HistoryFetcher> ReliableFetcher<F> {
    pub fn new(inner: F, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: F) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Delay before retry number `attempt` (0-based).
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_ms = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(10.0) as u64)
    }
}

#[async_trait]
impl<F: HistoryFetcher> HistoryFetcher for ReliableFetcher<F> {
    async fn fetch_history(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Vec<Message>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch_history(identity, window).await {
                Ok(page) => return Ok(page),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying history fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use alertsync_core::Role;
    use chrono::{TimeZone, Utc};

    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<Vec<Message>, FetchError>>>,
        calls: AtomicU64,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<Vec<Message>, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl HistoryFetcher for ScriptedFetcher {
        async fn fetch_history(
            &self,
            _identity: &Identity,
            _window: &TimeWindow,
        ) -> Result<Vec<Message>, FetchError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.2,
        }
    }

    fn who() -> Identity {
        Identity::new("a@example.com", Role::Normal, None)
    }

    fn window() -> TimeWindow {
        TimeWindow::new(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(60, 0).unwrap())
            .unwrap()
    }

    fn server_error() -> FetchError {
        FetchError::Server {
            status: 502,
            body: "bad gateway".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let fetcher = ReliableFetcher::new(
            ScriptedFetcher::new(vec![Err(server_error()), Err(server_error()), Ok(Vec::new())]),
            fast(),
        );
        assert!(fetcher.fetch_history(&who(), &window()).await.is_ok());
        assert_eq!(fetcher.total_retries(), 2);
        assert_eq!(fetcher.inner().calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_not_retried() {
        let fetcher = ReliableFetcher::new(
            ScriptedFetcher::new(vec![Err(FetchError::Unauthorized("expired".into())), Ok(Vec::new())]),
            fast(),
        );
        let err = fetcher.fetch_history(&who(), &window()).await.unwrap_err();
        assert!(err.requires_reauth());
        assert_eq!(fetcher.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let fetcher = ReliableFetcher::new(
            ScriptedFetcher::new((0..10).map(|_| Err(server_error())).collect()),
            fast(),
        );
        let err = fetcher.fetch_history(&who(), &window()).await.unwrap_err();
        assert_eq!(err, server_error());
        assert_eq!(fetcher.inner().calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let fetcher = ReliableFetcher::new(
            ScriptedFetcher::new(Vec::new()),
            RetryConfig {
                jitter_factor: 0.0,
                ..fast()
            },
        );
        assert_eq!(fetcher.retry_delay(0, None), Duration::from_millis(10));
        assert_eq!(fetcher.retry_delay(1, None), Duration::from_millis(20));
        assert_eq!(fetcher.retry_delay(6, None), Duration::from_millis(50));
    }

    #[test]
    fn suggested_delay_is_capped() {
        let fetcher = ReliableFetcher::new(ScriptedFetcher::new(Vec::new()), fast());
        assert_eq!(
            fetcher.retry_delay(0, Some(Duration::from_millis(30))),
            Duration::from_millis(30)
        );
        assert_eq!(
            fetcher.retry_delay(0, Some(Duration::from_secs(60))),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn jitter_stays_in_range() {
        let fetcher = ReliableFetcher::new(ScriptedFetcher::new(Vec::new()), fast());
        for _ in 0..100 {
            let delay = fetcher.retry_delay(1, None).as_millis();
            assert!((16..=24).contains(&delay), "delay {delay}");
        }
    }
}
