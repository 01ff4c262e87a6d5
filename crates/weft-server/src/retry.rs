use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use weft_common::config;

/// How often and how patiently a fallible remote call is repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay: Duration,
        max_delay: Duration,
        factor: u32,
    },
}

/// The pauses between consecutive attempts of one retried call.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: u32,
    remaining: usize,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = current.saturating_mul(self.factor).min(self.max);
        Some(current)
    }
}

impl RetryStrategy {
    /// The number of times the call runs when every attempt fails.
    pub fn max_attempts(&self) -> usize {
        match self {
            Self::Fixed { max_count, .. } | Self::ExponentialBackoff { max_count, .. } => {
                max_count + 1
            }
        }
    }

    pub fn backoff(&self) -> Backoff {
        match *self {
            Self::Fixed { max_count, delay } => Backoff {
                next: delay,
                max: delay,
                factor: 1,
                remaining: max_count,
            },
            Self::ExponentialBackoff {
                max_count,
                initial_delay,
                max_delay,
                factor,
            } => Backoff {
                next: initial_delay.min(max_delay),
                max: max_delay,
                factor,
                remaining: max_count,
            },
        }
    }

    /// Calls `operation` until it succeeds. Once the backoff is exhausted the error of the
    /// last attempt is returned.
    pub async fn run<F, Fut, T, E>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let total = self.max_attempts();
        let mut backoff = self.backoff();
        let mut attempt = 1;
        loop {
            let e = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let Some(pause) = backoff.next() else {
                warn!("{label} failed after {total} attempts: {e}");
                return Err(e);
            };
            debug!("{label} failed at attempt {attempt} of {total}, retrying in {pause:?}: {e}");
            tokio::time::sleep(pause).await;
            attempt += 1;
        }
    }
}

impl From<&config::RetryStrategy> for RetryStrategy {
    fn from(value: &config::RetryStrategy) -> Self {
        match value {
            config::RetryStrategy::Fixed(fixed) => Self::Fixed {
                max_count: fixed.max_count,
                delay: Duration::from_secs(fixed.delay_secs),
            },
            config::RetryStrategy::ExponentialBackoff(backoff) => Self::ExponentialBackoff {
                max_count: backoff.max_count,
                initial_delay: Duration::from_secs(backoff.initial_delay_secs),
                max_delay: Duration::from_secs(backoff.max_delay_secs),
                factor: backoff.factor,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn count_calls(
        calls: &Arc<AtomicUsize>,
        failures: usize,
    ) -> impl Future<Output = Result<usize, String>> {
        let calls = Arc::clone(calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(format!("provider unavailable ({n})"))
            } else {
                Ok(n)
            }
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let strategy = RetryStrategy::ExponentialBackoff {
            max_count: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 2,
        };
        let pauses = strategy.backoff().collect::<Vec<_>>();
        assert_eq!(pauses, [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec());
        assert_eq!(strategy.max_attempts(), 6);
    }

    #[test]
    fn test_fixed_backoff_repeats_delay() {
        let strategy = RetryStrategy::Fixed {
            max_count: 3,
            delay: Duration::from_millis(250),
        };
        assert_eq!(
            strategy.backoff().collect::<Vec<_>>(),
            vec![Duration::from_millis(250); 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_first_success() {
        let strategy = RetryStrategy::Fixed {
            max_count: 3,
            delay: Duration::from_secs(1),
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let result = strategy
            .run("create instance", || count_calls(&calls, 2))
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_last_error() {
        let strategy = RetryStrategy::Fixed {
            max_count: 2,
            delay: Duration::from_secs(1),
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let result = strategy
            .run("destroy instance", || count_calls(&calls, usize::MAX))
            .await;
        assert_eq!(result, Err("provider unavailable (2)".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
