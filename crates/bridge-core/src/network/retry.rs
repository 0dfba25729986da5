//! Retry logic with exponential backoff and additive jitter.
//!
//! Remote calls are retried on transient failures only. The delay before
//! attempt `k` (k >= 2) is `base * 2^(k-1)`, capped at `max_delay`, plus a
//! uniformly drawn jitter in `[jitter_min, jitter_max]` so that requests
//! failing together do not retry together.

use super::client::RemoteTransport;
use crate::error::BridgeError;
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Backoff unit before jitter.
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Lower bound of the additive jitter.
    pub jitter_min: Duration,
    /// Upper bound of the additive jitter.
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_min: Duration::from_millis(200),
            jitter_max: Duration::from_millis(600),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter range. Pass equal bounds for a deterministic delay.
    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Exponential part of the delay before `attempt` (1-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Full delay (backoff plus jitter) before `attempt` (1-indexed, >= 2).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max > self.jitter_min {
            let mut rng = rand::rng();
            Duration::from_millis(
                rng.random_range(self.jitter_min.as_millis()..=self.jitter_max.as_millis()) as u64,
            )
        } else {
            self.jitter_min
        };
        self.backoff_for_attempt(attempt) + jitter
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Every backoff sleep, in order.
    pub delays: Vec<Duration>,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

impl RetryStats {
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

/// Retry an async operation with exponential backoff.
///
/// Returns the final result (the last observed error on exhaustion) together
/// with the stats of the run.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        stats.attempts = attempt;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!("Error is not retryable: {}", err);
            return (Err(err), stats);
        }

        if attempt >= max_attempts {
            warn!(
                "All {} retry attempts exhausted. Last error: {}",
                max_attempts, err
            );
            return (Err(err), stats);
        }

        attempt += 1;
        let delay = policy.delay_for_attempt(attempt);
        stats.delays.push(delay);

        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt - 1,
            max_attempts,
            err,
            delay
        );

        tokio::time::sleep(delay).await;
    }
}

/// Performs remote calls through a transport under a retry policy.
#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn RemoteTransport>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn RemoteTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Forward one envelope, retrying transient failures.
    pub async fn call(&self, body: &Value) -> (Result<Value, BridgeError>, RetryStats) {
        retry_async(
            &self.policy,
            || self.transport.forward(body),
            BridgeError::is_retryable,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Transport replaying a scripted sequence of outcomes.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Value>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteTransport for ScriptedTransport {
        async fn forward(&self, _body: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::Network {
                    message: "script exhausted".into(),
                }))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn refused() -> BridgeError {
        BridgeError::Network {
            message: "connection refused".into(),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new().with_base_delay(Duration::from_millis(100));

        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30));

        // 10 * 2^3 = 80s, but capped at 30s
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_within_jitter_bounds() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(Duration::from_millis(200), Duration::from_millis(600));

        for attempt in 2..=4 {
            let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
            for _ in 0..20 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(
                    delay >= backoff + Duration::from_millis(200)
                        && delay <= backoff + Duration::from_millis(600),
                    "Delay {:?} for attempt {} out of bounds",
                    delay,
                    attempt
                );
            }
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let policy = RetryPolicy::new().with_max_attempts(3);

        let (result, stats) =
            retry_async(&policy, || async { Ok::<_, String>(42) }, |_: &String| true).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(stats.attempts, 1);
        assert!(stats.delays.is_empty());
        assert!(stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_last_error() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        let counter = AtomicU32::new(0);

        let (result, stats) = retry_async(
            &policy,
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<i32, _>(format!("failure #{}", n + 1)) }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "failure #3");
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.delays.len(), 2);
        assert!(!stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_refused_twice_then_success() {
        let transport = ScriptedTransport::new(vec![
            Err(refused()),
            Err(refused()),
            Ok(serde_json::json!({"tools": ["third"]})),
        ]);
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(100));
        let executor = RetryExecutor::new(transport.clone(), policy);

        let started = tokio::time::Instant::now();
        let (result, stats) = executor.call(&serde_json::json!({})).await;

        assert_eq!(result.unwrap(), serde_json::json!({"tools": ["third"]}));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.delays.len(), 2);

        // Before attempt 2: 100ms * 2 + [200, 600]ms
        assert!(stats.delays[0] >= Duration::from_millis(400));
        assert!(stats.delays[0] <= Duration::from_millis(800));
        // Before attempt 3: 100ms * 4 + [200, 600]ms
        assert!(stats.delays[1] >= Duration::from_millis(600));
        assert!(stats.delays[1] <= Duration::from_millis(1000));

        assert!(started.elapsed() >= stats.total_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(BridgeError::Authentication { status: 401 }),
            Ok(serde_json::json!("never reached")),
        ]);
        let executor = RetryExecutor::new(transport.clone(), RetryPolicy::new());

        let (result, stats) = executor.call(&serde_json::json!({})).await;

        assert!(matches!(result, Err(BridgeError::Authentication { status: 401 })));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(stats.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_until_exhausted() {
        let unavailable = || BridgeError::RemoteStatus {
            status: 503,
            message: "unavailable".into(),
        };
        let transport = ScriptedTransport::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(BridgeError::RemoteStatus {
                status: 502,
                message: "bad gateway".into(),
            }),
        ]);
        let executor = RetryExecutor::new(transport.clone(), RetryPolicy::new());

        let (result, stats) = executor.call(&serde_json::json!({})).await;

        assert!(matches!(
            result,
            Err(BridgeError::RemoteStatus { status: 502, .. })
        ));
        assert_eq!(stats.attempts, 3);
    }
}
