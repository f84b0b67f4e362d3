//! Retry with backoff for outbound calls
//!
//! Each call site supplies a classifier that sorts failures into retryable,
//! overloaded, or fatal. Overload failures back off longer and raise the
//! attempt ceiling to at least [`OVERLOAD_MIN_ATTEMPTS`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum number of attempts once an overload failure has been seen
pub const OVERLOAD_MIN_ATTEMPTS: u32 = 5;

/// First overload wait; later waits add 3/5 of it per attempt, plus up to
/// 2/5 of it as jitter
pub const OVERLOAD_BASE_DELAY_MS: u64 = 5000;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient (timeouts, 5xx, 429)
    Retryable,
    /// Service capacity exhausted (HTTP 503, "overloaded", "unavailable")
    Overloaded,
    /// Never retried (auth, bad request)
    Fatal,
}

/// Errors that know their own retry class
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// Delay growth between ordinary retryable attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * 2^attempt` plus up to 1s jitter
    #[default]
    Exponential,
    /// `base * attempt_number`, no jitter
    Linear,
}

/// Parameters for one retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub operation_name: String,
    /// Additional attempts after the first
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    pub overload_delay_ms: u64,
}

impl RetryContext {
    pub fn new(operation_name: impl Into<String>, max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            operation_name: operation_name.into(),
            max_retries,
            base_delay_ms,
            backoff: Backoff::Exponential,
            overload_delay_ms: OVERLOAD_BASE_DELAY_MS,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, class: ErrorClass, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        let ms = match (class, self.backoff) {
            (ErrorClass::Overloaded, _) => {
                let base = self.overload_delay_ms;
                let step = base * 3 / 5;
                let jitter = (base * 2 / 5).max(1);
                base + u64::from(attempt) * step + rng.gen_range(0..jitter)
            }
            (_, Backoff::Linear) => self.base_delay_ms * (u64::from(attempt) + 1),
            (_, Backoff::Exponential) => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                self.base_delay_ms
                    .saturating_mul(factor)
                    .saturating_add(rng.gen_range(0..1000))
            }
        };
        Duration::from_millis(ms)
    }
}

/// Retry defaults used to build contexts for network calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub overload_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            overload_delay_ms: OVERLOAD_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn context(&self, operation_name: impl Into<String>) -> RetryContext {
        RetryContext {
            overload_delay_ms: self.overload_delay_ms,
            ..RetryContext::new(operation_name, self.max_retries, self.base_delay_ms)
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the attempt ceiling is hit.
///
/// `op` receives the 0-based attempt index.
pub async fn execute<T, E, F, Fut>(ctx: &RetryContext, op: F) -> Result<T, E>
where
    E: Classify + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    execute_with(ctx, E::classify, op).await
}

/// Like [`execute`] with a call-site specific classifier
pub async fn execute_with<T, E, C, F, Fut>(ctx: &RetryContext, classify: C, mut op: F) -> Result<T, E>
where
    E: Display,
    C: Fn(&E) -> ErrorClass,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut ceiling = ctx.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", ctx.operation_name, attempt + 1);
                }
                return Ok(value);
            }
            Err(err) => {
                let class = classify(&err);
                if class == ErrorClass::Overloaded {
                    ceiling = ceiling.max(OVERLOAD_MIN_ATTEMPTS);
                }

                let next = attempt + 1;
                if class == ErrorClass::Fatal || next >= ceiling {
                    warn!(
                        "{} failed after {} attempt(s): {}",
                        ctx.operation_name, next, err
                    );
                    return Err(err);
                }

                let delay = ctx.delay_for(class, attempt);
                warn!(
                    "{} attempt {}/{} failed ({:?}): {}; retrying in {}ms",
                    ctx.operation_name,
                    next,
                    ceiling,
                    class,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(ErrorClass);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    impl Classify for TestError {
        fn classify(&self) -> ErrorClass {
            self.0
        }
    }

    async fn count_calls(ctx: &RetryContext, class: ErrorClass, succeed_on: Option<u32>) -> (u32, bool) {
        let calls = AtomicU32::new(0);
        let result = execute(ctx, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if succeed_on == Some(attempt) {
                    Ok(attempt)
                } else {
                    Err(TestError(class))
                }
            }
        })
        .await;
        (calls.load(Ordering::SeqCst), result.is_ok())
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_exhausts_configured_retries() {
        let ctx = RetryContext::new("op", 2, 10);
        assert_eq!(count_calls(&ctx, ErrorClass::Retryable, None).await, (3, false));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let ctx = RetryContext::new("op", 4, 10);
        assert_eq!(count_calls(&ctx, ErrorClass::Fatal, None).await, (1, false));
    }

    #[tokio::test(start_paused = true)]
    async fn overload_raises_attempt_ceiling() {
        let ctx = RetryContext::new("op", 1, 10);
        assert_eq!(count_calls(&ctx, ErrorClass::Overloaded, None).await, (5, false));
    }

    #[tokio::test(start_paused = true)]
    async fn overload_keeps_larger_configured_ceiling() {
        let ctx = RetryContext::new("op", 7, 10);
        assert_eq!(count_calls(&ctx, ErrorClass::Overloaded, None).await, (8, false));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failures_returns_value() {
        let ctx = RetryContext::new("op", 2, 10);
        assert_eq!(count_calls(&ctx, ErrorClass::Retryable, Some(2)).await, (3, true));
    }

    #[tokio::test(start_paused = true)]
    async fn linear_backoff_waits_step_times_attempt() {
        let ctx = RetryContext::new("op", 2, 2000).with_backoff(Backoff::Linear);
        let start = tokio::time::Instant::now();
        let _ = count_calls(&ctx, ErrorClass::Retryable, None).await;
        assert_eq!(start.elapsed(), Duration::from_millis(2000 + 4000));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_error_class() {
        let ctx = RetryContext::new("op", 2, 10);
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = execute_with(
            &ctx,
            |_| ErrorClass::Retryable,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(ErrorClass::Overloaded)) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exponential_delay_bounds() {
        let ctx = RetryContext::new("op", 3, 1000);
        for attempt in 0..4 {
            let ms = ctx.delay_for(ErrorClass::Retryable, attempt).as_millis() as u64;
            let floor = 1000 * (1 << attempt);
            assert!((floor..floor + 1000).contains(&ms), "attempt {attempt}: {ms}");
        }
    }

    #[test]
    fn overload_delay_exceeds_retryable_delay() {
        let ctx = RetryContext::new("op", 3, 1000);
        for attempt in 0..4 {
            for _ in 0..50 {
                let overload = ctx.delay_for(ErrorClass::Overloaded, attempt);
                let retryable = ctx.delay_for(ErrorClass::Retryable, attempt);
                assert!(overload > retryable, "attempt {attempt}");
                let ms = overload.as_millis() as u64;
                let floor = 5000 + u64::from(attempt) * 3000;
                assert!((floor..floor + 2000).contains(&ms));
            }
        }
    }

    #[test]
    fn policy_builds_contexts() {
        let ctx = RetryPolicy::default().context("synthesize");
        assert_eq!(ctx.operation_name, "synthesize");
        assert_eq!(ctx.max_retries, 3);
        assert_eq!(ctx.backoff, Backoff::Exponential);
        assert_eq!(ctx.overload_delay_ms, 5000);
    }

    #[test]
    fn overload_delay_scales_with_configured_base() {
        let policy = RetryPolicy {
            overload_delay_ms: 50,
            ..Default::default()
        };
        let ctx = policy.context("op");
        for _ in 0..50 {
            let ms = ctx.delay_for(ErrorClass::Overloaded, 2).as_millis() as u64;
            assert!((110..130).contains(&ms), "{ms}");
        }
    }
}
