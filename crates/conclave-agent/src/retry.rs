use crate::backends::AgentBackend;
use conclave_core::{AgentRequest, AgentResponse, ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Configures retry behaviour for a single remote agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Delay before retry number `retry` (1-based): `backoff_ms * 2^(retry - 1)`.
pub fn compute_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let exponent = retry.saturating_sub(1);
    policy
        .backoff_ms
        .saturating_mul(2u64.saturating_pow(exponent))
}

/// Wraps one remote `analyze` call with bounded retries and exponential backoff.
///
/// Errors are classified with [`ConclaveError::is_retryable`]. A fatal error
/// propagates on first occurrence without consuming retry budget; once the
/// budget is spent the last observed error is returned. Each attempt races an
/// independent timer when a timeout is configured.
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    timeout: Option<Duration>,
    /// Injectable sleep function for testing (allows skipping real delays).
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl RetryOrchestrator {
    /// Create an orchestrator with the given policy and no per-call timeout.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            timeout: None,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// Bound every attempt by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The active retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn attempt(
        &self,
        backend: &dyn AgentBackend,
        request: &AgentRequest,
    ) -> ConclaveResult<AgentResponse> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, backend.analyze(request))
                .await
                .map_err(|_| {
                    ConclaveError::Agent(format!(
                        "request timeout after {}ms",
                        limit.as_millis()
                    ))
                })?,
            None => backend.analyze(request).await,
        }
    }

    /// Call `backend` until it succeeds, fails fatally, or retries run out.
    pub async fn call(
        &self,
        backend: &dyn AgentBackend,
        request: &AgentRequest,
    ) -> ConclaveResult<AgentResponse> {
        let mut retries = 0u32;
        loop {
            match self.attempt(backend, request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_retryable() => {
                    warn!(
                        model = backend.model_id(),
                        role = %request.role,
                        code = e.code(),
                        error = %e,
                        "Non-retryable agent error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    if retries >= self.policy.max_retries {
                        warn!(
                            model = backend.model_id(),
                            role = %request.role,
                            retries,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(e);
                    }
                    retries += 1;
                    let delay = compute_backoff(&self.policy, retries);
                    info!(
                        model = backend.model_id(),
                        role = %request.role,
                        attempt = retries,
                        delay_ms = delay,
                        error = %e,
                        "Retryable agent error, backing off"
                    );
                    self.do_sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryOrchestrator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_core::{AgentRole, TaskKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// A mock backend that returns a sequence of results.
    struct MockBackend {
        results: tokio::sync::Mutex<Vec<ConclaveResult<AgentResponse>>>,
        call_count: AtomicU32,
    }

    impl MockBackend {
        fn new(results: Vec<ConclaveResult<AgentResponse>>) -> Self {
            Self {
                results: tokio::sync::Mutex::new(results),
                call_count: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentBackend for MockBackend {
        async fn analyze(&self, _request: &AgentRequest) -> ConclaveResult<AgentResponse> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(ConclaveError::Agent("MockBackend: no more results".into()))
            } else {
                results.remove(0)
            }
        }

        fn model_id(&self) -> &str {
            "mock"
        }
    }

    /// Never answers; only a timeout can end the call.
    struct HangingBackend;

    #[async_trait]
    impl AgentBackend for HangingBackend {
        async fn analyze(&self, _request: &AgentRequest) -> ConclaveResult<AgentResponse> {
            std::future::pending().await
        }

        fn model_id(&self) -> &str {
            "hanging"
        }
    }

    fn ok(summary: &str) -> ConclaveResult<AgentResponse> {
        Ok(AgentResponse {
            summary: summary.into(),
            ..Default::default()
        })
    }

    fn request() -> AgentRequest {
        AgentRequest::new(AgentRole::Architect, TaskKind::Architecture)
    }

    fn recording(policy: RetryPolicy) -> (RetryOrchestrator, Arc<Mutex<Vec<u64>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let sink = delays.clone();
        let sleep: SleepFn = Box::new(
            move |ms| -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
                sink.lock().unwrap().push(ms);
                Box::pin(async {})
            },
        );
        let orchestrator = RetryOrchestrator {
            policy,
            timeout: None,
            sleep_fn: Some(sleep),
        };
        (orchestrator, delays)
    }

    #[tokio::test]
    async fn succeeds_after_two_rate_limits() {
        let backend = MockBackend::new(vec![
            Err(ConclaveError::Agent("rate limit exceeded".into())),
            Err(ConclaveError::Agent("rate limit exceeded".into())),
            ok("done"),
        ]);
        let (retry, delays) = recording(RetryPolicy::default());

        let resp = retry.call(&backend, &request()).await.unwrap();
        assert_eq!(resp.summary, "done");
        assert_eq!(backend.calls(), 3);
        assert_eq!(*delays.lock().unwrap(), vec![1000, 2000]);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let backend = MockBackend::new(vec![
            Err(ConclaveError::Agent("invalid request body".into())),
            ok("never"),
        ]);
        let (retry, delays) = recording(RetryPolicy::default());

        let err = retry.call(&backend, &request()).await.unwrap_err();
        assert!(err.to_string().contains("invalid request body"));
        assert_eq!(backend.calls(), 1);
        assert!(delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_error_is_not_retried() {
        let backend = MockBackend::new(vec![
            Err(ConclaveError::Tool("run_tests timeout".into())),
            ok("never"),
        ]);
        let (retry, _) = recording(RetryPolicy::default());

        let err = retry.call(&backend, &request()).await.unwrap_err();
        assert_eq!(err.code(), "TOOL_ERROR");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let backend = MockBackend::new(vec![
            Err(ConclaveError::Agent("429 first".into())),
            Err(ConclaveError::Agent("429 second".into())),
            Err(ConclaveError::Agent("429 third".into())),
            Err(ConclaveError::Agent("429 fourth".into())),
            ok("unreachable"),
        ]);
        let (retry, delays) = recording(RetryPolicy::default());

        let err = retry.call(&backend, &request()).await.unwrap_err();
        assert!(err.to_string().contains("429 fourth"), "got: {err}");
        assert_eq!(backend.calls(), 4);
        assert_eq!(*delays.lock().unwrap(), vec![1000, 2000, 4000]);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let backend = MockBackend::new(vec![Err(ConclaveError::Agent("timeout".into()))]);
        let (retry, _) = recording(RetryPolicy {
            max_retries: 0,
            backoff_ms: 10,
        });
        assert!(retry.call(&backend, &request()).await.is_err());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_retryable() {
        let (retry, delays) = recording(RetryPolicy {
            max_retries: 2,
            backoff_ms: 5,
        });
        let retry = retry.with_timeout(Duration::from_millis(10));

        let err = retry.call(&HangingBackend, &request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout after 10ms"));
        assert_eq!(*delays.lock().unwrap(), vec![5, 10]);
    }

    #[test]
    fn backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_ms: 1000,
        };
        assert_eq!(compute_backoff(&policy, 1), 1000);
        assert_eq!(compute_backoff(&policy, 2), 2000);
        assert_eq!(compute_backoff(&policy, 3), 4000);
        assert_eq!(compute_backoff(&policy, 4), 8000);
    }

    #[test]
    fn policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_ms, 1000);
    }
}
