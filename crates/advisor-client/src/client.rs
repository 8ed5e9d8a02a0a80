//! Resilient advisory client.
//!
//! Each attempt is bounded by `request_timeout`. Transport failures are
//! retried with exponential backoff plus random jitter until `max_attempts`
//! calls have been made. Rejected and malformed responses end the request
//! immediately. The whole loop races the caller's [`AskContext`]; when the
//! context finishes first the in-flight attempt is dropped and the request
//! ends as [`AdvisoryError::Cancelled`].

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use llm_advisor_core::config::AdvisoryConfig;

use crate::context::AskContext;
use crate::error::AdvisoryError;
use crate::transport::AdvisoryTransport;

/// Timeout and retry parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, first attempt included
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AdvisoryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            request_timeout: config.request_timeout(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before attempt `failed_attempt + 1`, without jitter
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    fn backoff_with_jitter(&self, failed_attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff(failed_attempt) + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AdvisoryConfig::default())
    }
}

/// Advisory client wrapping a transport with timeout, retry and cancellation
#[derive(Clone)]
pub struct AdvisoryClient {
    transport: Arc<dyn AdvisoryTransport>,
    policy: RetryPolicy,
}

impl fmt::Debug for AdvisoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisoryClient")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl AdvisoryClient {
    pub fn new(transport: Arc<dyn AdvisoryTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn from_config(transport: Arc<dyn AdvisoryTransport>, config: &AdvisoryConfig) -> Self {
        Self::new(transport, RetryPolicy::from_config(config))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Request advice for `prompt` under `ctx`
    #[instrument(skip(self, ctx, prompt), fields(transport = self.transport.name(), prompt_len = prompt.len()))]
    pub async fn ask(&self, ctx: &AskContext, prompt: &str) -> Result<String, AdvisoryError> {
        if ctx.is_done() {
            return Err(AdvisoryError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = ctx.done() => {
                warn!("Advisory request cancelled by caller");
                Err(AdvisoryError::Cancelled)
            }
            result = self.ask_with_retry(prompt) => result,
        }
    }

    async fn ask_with_retry(&self, prompt: &str) -> Result<String, AdvisoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result =
                match tokio::time::timeout(self.policy.request_timeout, self.transport.complete(prompt))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AdvisoryError::transport(format!(
                        "attempt timed out after {}ms",
                        self.policy.request_timeout.as_millis()
                    ))),
                };

            match result {
                Ok(text) => {
                    debug!(attempt, response_len = text.len(), "Advisory request succeeded");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_with_jitter(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        retry_delay_ms = delay.as_millis() as u64,
                        "Retrying advisory request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), attempt, "Advisory request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, repeating the last one
    struct Scripted {
        results: Mutex<VecDeque<Result<String, AdvisoryError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(results: Vec<Result<String, AdvisoryError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AdvisoryTransport for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<String, AdvisoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            }
        }
    }

    /// Never answers
    struct Hanging {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AdvisoryTransport for Hanging {
        async fn complete(&self, _prompt: &str) -> Result<String, AdvisoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            request_timeout: Duration::from_millis(200),
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            jitter: Duration::from_millis(1),
        }
    }

    fn unavailable() -> Result<String, AdvisoryError> {
        Err(AdvisoryError::transport("HTTP 503: unavailable"))
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            request_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
        assert_eq!(policy.backoff_with_jitter(2), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..fast_policy(3)
        };
        for _ in 0..100 {
            let delay = policy.backoff_with_jitter(1);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(51));
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let transport = Scripted::new(vec![Ok("Increase threshold to 85%".to_string())]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(3));

        let text = client.ask(&AskContext::background(), "p").await.unwrap();
        assert_eq!(text, "Increase threshold to 85%");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_server_errors_retried_max_attempts_times() {
        let transport = Scripted::new(vec![unavailable()]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(4));

        let err = client.ask(&AskContext::background(), "p").await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let transport = Scripted::new(vec![unavailable(), unavailable(), Ok("ok".to_string())]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(3));

        assert_eq!(client.ask(&AskContext::background(), "p").await.unwrap(), "ok");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let transport = Scripted::new(vec![Err(AdvisoryError::Rejected {
            status: 400,
            message: "bad request".to_string(),
        })]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(5));

        let err = client.ask(&AskContext::background(), "p").await.unwrap_err();
        assert_eq!(err.kind(), "rejected");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let transport = Scripted::new(vec![Err(AdvisoryError::malformed("no choices"))]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(5));

        let err = client.ask(&AskContext::background(), "p").await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transport_and_retried() {
        let transport = Arc::new(Hanging {
            calls: AtomicU32::new(0),
        });
        let policy = RetryPolicy {
            request_timeout: Duration::from_millis(20),
            ..fast_policy(2)
        };
        let client = AdvisoryClient::new(transport.clone(), policy);

        let err = client.ask(&AskContext::background(), "p").await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_caller_deadline_cancels() {
        let transport = Arc::new(Hanging {
            calls: AtomicU32::new(0),
        });
        let policy = RetryPolicy {
            request_timeout: Duration::from_secs(30),
            ..fast_policy(3)
        };
        let client = AdvisoryClient::new(transport, policy);
        let ctx = AskContext::background().with_timeout(Duration::from_millis(20));

        let err = client.ask(&ctx, "p").await.unwrap_err();
        assert_eq!(err, AdvisoryError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_handle_cancels_in_flight() {
        let transport = Arc::new(Hanging {
            calls: AtomicU32::new(0),
        });
        let client = AdvisoryClient::new(transport.clone(), fast_policy(1));
        let (ctx, handle) = AskContext::cancellable();

        let task = tokio::spawn(async move { client.ask(&ctx, "p").await });
        while transport.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(AdvisoryError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let transport = Scripted::new(vec![Ok("x".to_string())]);
        let client = AdvisoryClient::new(transport.clone(), fast_policy(3));
        let (ctx, handle) = AskContext::cancellable();
        handle.cancel();

        assert_eq!(client.ask(&ctx, "p").await, Err(AdvisoryError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }
}
