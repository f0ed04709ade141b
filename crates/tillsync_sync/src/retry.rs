//! Retry policy: failure classification, backoff, and the retry loop.

use crate::config::RetryConfig;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The facts about a failure the retry classifier looks at.
///
/// Every method defaults to "no", so an error type only overrides what it
/// can actually tell.
pub trait FailureSignal {
    /// The caller explicitly asked for no retry.
    fn no_retry(&self) -> bool {
        false
    }

    /// The request failed below HTTP.
    fn is_transport(&self) -> bool {
        false
    }

    /// The client timed out or cancelled the request.
    fn is_timeout(&self) -> bool {
        false
    }

    /// HTTP status of the response, if any.
    fn status(&self) -> Option<u16> {
        None
    }
}

/// `min(initial * multiplier^(attempt - 1), max)`, with `attempt` 1-indexed.
///
/// An `attempt` of 0 is treated as 1.
pub fn calculate_exponential_backoff(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let max_ms = max.as_millis() as f64;
    let delay_ms = (initial.as_millis() as f64 * multiplier.powi(exponent)).min(max_ms);
    if delay_ms.is_nan() || delay_ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis(delay_ms.round() as u64)
}

/// Decides whether a failed call should be retried.
///
/// Rules, first match wins:
/// 1. flagged do-not-retry: no
/// 2. transport failure: yes
/// 3. timeout or cancellation: yes
/// 4. status 5xx, 408, or 429: yes; any other status: no
/// 5. anything else: no
///
/// `response_status` takes precedence over the status carried by `error`.
pub fn is_retryable_error<E: FailureSignal + ?Sized>(
    error: &E,
    response_status: Option<u16>,
) -> bool {
    if error.no_retry() {
        return false;
    }
    if error.is_transport() || error.is_timeout() {
        return true;
    }
    match response_status.or_else(|| error.status()) {
        Some(status) => (500..600).contains(&status) || status == 408 || status == 429,
        None => false,
    }
}

type ShouldRetry<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type OnRetry<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Options for [`fetch_with_retry`].
pub struct RetryOptions<E> {
    /// Attempt count and delays.
    pub config: RetryConfig,
    should_retry: ShouldRetry<E>,
    on_retry: Option<OnRetry<E>>,
}

impl<E: FailureSignal> RetryOptions<E> {
    /// Uses [`is_retryable_error`] to decide.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_predicate(config, |error: &E, _| is_retryable_error(error, None))
    }
}

impl<E: FailureSignal> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E> RetryOptions<E> {
    /// Uses a custom `should_retry(error, attempt)` predicate.
    pub fn with_predicate(
        config: RetryConfig,
        should_retry: impl Fn(&E, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            should_retry: Arc::new(should_retry),
            on_retry: None,
        }
    }

    /// Registers `on_retry(error, attempt, delay)`, called before each wait.
    #[must_use]
    pub fn on_retry(mut self, hook: impl Fn(&E, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Whether the failure of `attempt` should be retried, attempts left
    /// permitting.
    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.should_retry)(error, attempt)
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            should_retry: Arc::clone(&self.should_retry),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Runs `operation` until it succeeds, the predicate declines, or attempts
/// run out. The last error is returned unchanged.
pub async fn fetch_with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= max_attempts || !options.should_retry(&error, attempt) {
            return Err(error);
        }

        let delay = options.config.delay_for_attempt(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "call failed, retrying"
        );
        if let Some(hook) = &options.on_retry {
            hook(&error, attempt, delay);
        }
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
