use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::providers::errors::ProviderError;

/// Fixed-count, fixed-delay retry around a fallible async call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            wait: settings.wait(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn run<T, F, Fut, P>(
        &self,
        label: &str,
        should_retry: P,
        mut op: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        P: Fn(&anyhow::Error) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        attempt,
                        self.max_attempts,
                        err
                    );
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    tracing::info!("Retrying {} in {:?}", label, self.wait);
                    tokio::time::sleep(self.wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// True for provider failures that a later identical request could get past
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ProviderError>()
        .is_some_and(ProviderError::is_retryable)
}

/// Retry every error
pub fn always(_: &anyhow::Error) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = quick(3)
            .run("call", is_transient, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(anyhow::Error::from(ProviderError::RateLimited))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let err = quick(2)
            .run("call", always, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow!("failure {}", attempt)) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let err = quick(5)
            .run("call", is_transient, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(anyhow::Error::from(ProviderError::RequestFailed {
                        status: StatusCode::UNAUTHORIZED,
                        body: "bad key".into(),
                    }))
                }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&ProviderError::Server(StatusCode::BAD_GATEWAY).into()));
        assert!(!is_transient(&anyhow!("plain error")));
    }

    #[test]
    fn test_from_settings() {
        let policy = RetryPolicy::from(&RetrySettings {
            max_attempts: 0,
            wait_secs: 2,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.wait, Duration::from_secs(2));
    }
}
