use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

/* ============================= DEFAULTS ============================= */

/// Interval used by most cluster waiters.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for teardown waits (deprovisioning can be slow on bare metal).
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/* ============================= ERRORS ============================= */

/// Failure reported by a poll condition.
///
/// `Transient` keeps the loop going, `Fatal` ends it immediately.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("transient: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("{0}")]
    Fatal(#[source] anyhow::Error),
}

impl PollError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        PollError::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        PollError::Fatal(err.into())
    }

    /// Classify a client error.
    ///
    /// NotFound, conflicts, throttling, server-side and transport errors are
    /// retried. Authorization and validation errors are not going to heal by
    /// waiting, so they abort the poll.
    pub fn from_kube(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                404 | 409 | 429 => PollError::Transient(err.into()),
                code if code >= 500 => PollError::Transient(err.into()),
                _ => PollError::Fatal(err.into()),
            },
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                PollError::Transient(err.into())
            }
            _ => PollError::Fatal(err.into()),
        }
    }
}

impl From<kube::Error> for PollError {
    fn from(err: kube::Error) -> Self {
        PollError::from_kube(err)
    }
}

/// True when the API server answered 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/* ============================= WAIT POLICY ============================= */

/// Decides how long to sleep between two attempts.
pub trait WaitPolicy: Send {
    /// Delay after the given (1-based) failed attempt.
    fn next_delay(&mut self, attempt: u32) -> Duration;
}

/// Same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl WaitPolicy for FixedInterval {
    fn next_delay(&mut self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Delay grows by `factor` each attempt, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, factor: 2, max }
    }
}

impl WaitPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let multiplier = self.factor.max(1).saturating_pow(exp);
        self.initial.saturating_mul(multiplier).min(self.max)
    }
}

/* ============================= POLLING ============================= */

/// Poll `condition` until it reports done or `timeout` elapses.
///
/// The condition always runs at least once. The last sleep is clamped to the
/// deadline and the condition gets one final attempt there, so the call never
/// outlives `timeout` by more than one condition evaluation.
pub async fn poll_until<P, F, Fut>(
    description: &str,
    timeout: Duration,
    policy: P,
    mut condition: F,
) -> anyhow::Result<()>
where
    P: WaitPolicy,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, PollError>>,
{
    poll_for(description, timeout, policy, || {
        let fut = condition();
        async move { fut.await.map(|done| done.then_some(())) }
    })
    .await
}

/// Like [`poll_until`] but the condition yields a value once done.
pub async fn poll_for<T, P, F, Fut>(
    description: &str,
    timeout: Duration,
    mut policy: P,
    mut condition: F,
) -> anyhow::Result<T>
where
    P: WaitPolicy,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, PollError>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match condition().await {
            Ok(Some(value)) => {
                debug!(description, attempt, "poll_condition_met");
                return Ok(value);
            }
            Ok(None) => {}
            Err(PollError::Transient(e)) => {
                debug!(description, attempt, error = %e, "poll_transient_error");
            }
            Err(PollError::Fatal(e)) => {
                return Err(e.context(format!("aborted while waiting for {description}")));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            anyhow::bail!("timed out after {timeout:?} waiting for {description}");
        }

        let delay = policy.next_delay(attempt).min(deadline - now);
        sleep(delay).await;
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[test]
    fn test_fixed_interval_is_constant() {
        let mut p = FixedInterval(Duration::from_secs(3));
        assert_eq!(p.next_delay(1), Duration::from_secs(3));
        assert_eq!(p.next_delay(50), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let mut p = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(p.next_delay(1), Duration::from_millis(100));
        assert_eq!(p.next_delay(2), Duration::from_millis(200));
        assert_eq!(p.next_delay(3), Duration::from_millis(400));
        assert_eq!(p.next_delay(5), Duration::from_secs(1));
        assert_eq!(p.next_delay(1000), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_as_soon_as_condition_is_met() {
        let calls = counter();
        let start = Instant::now();

        let c = calls.clone();
        poll_until(
            "third call",
            Duration::from_secs(5),
            FixedInterval(Duration::from_secs(1)),
            || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n >= 3) }
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_runs_once_when_timeout_below_interval() {
        let calls = counter();
        let c = calls.clone();

        let result = poll_until(
            "never",
            Duration::from_millis(100),
            FixedInterval(Duration::from_secs(10)),
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            },
        )
        .await;

        assert!(result.is_err());
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_after_deadline() {
        let start = Instant::now();
        let err = poll_until(
            "namespace gone",
            Duration::from_secs(5),
            FixedInterval(Duration::from_secs(1)),
            || async { Ok(false) },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("namespace gone"));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let calls = counter();
        let c = calls.clone();

        poll_until(
            "flaky",
            Duration::from_secs(10),
            FixedInterval(Duration::from_secs(1)),
            || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 4 {
                        Err(PollError::transient(anyhow::anyhow!("connection reset")))
                    } else {
                        Ok(true)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_aborts_immediately() {
        let calls = counter();
        let c = calls.clone();

        let err = poll_until(
            "forbidden",
            Duration::from_secs(60),
            FixedInterval(Duration::from_secs(1)),
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(PollError::fatal(anyhow::anyhow!("forbidden"))) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(format!("{err:#}").contains("forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_for_returns_value() {
        let calls = counter();
        let c = calls.clone();

        let v = poll_for(
            "value",
            Duration::from_secs(10),
            FixedInterval(Duration::from_secs(1)),
            || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n == 2).then(|| "ready".to_string())) }
            },
        )
        .await
        .unwrap();

        assert_eq!(v, "ready");
    }

    #[test]
    fn test_kube_not_found_is_transient() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&err));
        assert!(matches!(PollError::from_kube(err), PollError::Transient(_)));
    }

    #[test]
    fn test_kube_forbidden_is_fatal() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(!is_not_found(&err));
        assert!(matches!(PollError::from_kube(err), PollError::Fatal(_)));
    }

    #[test]
    fn test_kube_server_error_is_transient() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "etcdserver: leader changed".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        });
        assert!(matches!(PollError::from_kube(err), PollError::Transient(_)));
    }
}
