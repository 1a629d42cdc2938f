//! Retry executor with backoff, jitter and cancellation.
//!
//! A [`Retry`] is built once from [`RetryOption`]s and invoked many times.
//! Each invocation runs the operation at least once; further attempts only
//! happen for failures the retry predicate accepts (by default, errors
//! flagged with [`Error::with_retryable`] anywhere in their chain).
//!
//! ```rust
//! use std::time::{Duration, SystemTime, UNIX_EPOCH};
//! use faultline_error::Error;
//! use faultline_resilience::{Backoff, Retry, RetryOption};
//!
//! # tokio_test_block_on(async {
//! let retry = Retry::new([
//!     RetryOption::MaxAttempts(3),
//!     RetryOption::Delay(Duration::from_millis(1)),
//!     RetryOption::Backoff(Backoff::Fixed),
//! ]);
//! let mut calls = 0;
//! let value = retry
//!     .execute_reply(|| {
//!         calls += 1;
//!         let attempt = calls;
//!         async move {
//!             if attempt < 2 {
//!                 Err(Error::new("flaky").with_retryable())
//!             } else {
//!                 Ok(attempt)
//!             }
//!         }
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 2);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use faultline_error::{Cancelled, DeadlineExceeded, Error, chain};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

/// Decides whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Observes every failed attempt the predicate accepted: `(attempt, error)`.
pub type RetryObserver = Arc<dyn Fn(u32, &Error) + Send + Sync>;

// =============================================================================
// Configuration
// =============================================================================

/// Serializable part of a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first. `0` behaves like `1`.
    pub max_attempts: u32,
    /// Base delay fed to the backoff strategy.
    pub delay: Duration,
    /// Upper bound for the computed delay; zero disables the cap.
    pub max_delay: Duration,
    /// Delay growth.
    pub backoff: Backoff,
    /// Add up to half the delay at random.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }
}

/// One setting of a [`Retry`] policy.
#[derive(Clone)]
pub enum RetryOption {
    /// Total attempts including the first.
    MaxAttempts(u32),
    /// Base delay.
    Delay(Duration),
    /// Delay cap.
    MaxDelay(Duration),
    /// Delay growth.
    Backoff(Backoff),
    /// Random jitter on or off.
    Jitter(bool),
    /// Replace the default "flagged retryable" predicate.
    RetryIf(RetryPredicate),
    /// Called after each accepted failure.
    OnRetry(RetryObserver),
    /// Abort waiting when the token fires.
    Cancellation(CancellationToken),
    /// Abort waiting at this instant.
    Deadline(Instant),
    /// Abort waiting this long after an invocation starts.
    Timeout(Duration),
}

impl fmt::Debug for RetryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAttempts(n) => f.debug_tuple("MaxAttempts").field(n).finish(),
            Self::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Self::MaxDelay(d) => f.debug_tuple("MaxDelay").field(d).finish(),
            Self::Backoff(b) => f.debug_tuple("Backoff").field(b).finish(),
            Self::Jitter(j) => f.debug_tuple("Jitter").field(j).finish(),
            Self::RetryIf(_) => f.write_str("RetryIf(..)"),
            Self::OnRetry(_) => f.write_str("OnRetry(..)"),
            Self::Cancellation(t) => f.debug_tuple("Cancellation").field(t).finish(),
            Self::Deadline(d) => f.debug_tuple("Deadline").field(d).finish(),
            Self::Timeout(d) => f.debug_tuple("Timeout").field(d).finish(),
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

/// A reusable retry policy.
#[derive(Clone, Default)]
pub struct Retry {
    config: RetryConfig,
    retry_if: Option<RetryPredicate>,
    on_retry: Option<RetryObserver>,
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl Retry {
    /// Defaults overridden by `options`, applied in order.
    pub fn new(options: impl IntoIterator<Item = RetryOption>) -> Self {
        let mut retry = Self::default();
        retry.apply(options);
        retry
    }

    /// Policy built from loaded configuration, without hooks.
    pub fn from_config(config: RetryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// A copy of this policy with `options` applied on top; `self` is untouched.
    pub fn transform(&self, options: impl IntoIterator<Item = RetryOption>) -> Self {
        let mut retry = self.clone();
        retry.apply(options);
        retry
    }

    fn apply(&mut self, options: impl IntoIterator<Item = RetryOption>) {
        for option in options {
            match option {
                RetryOption::MaxAttempts(n) => self.config.max_attempts = n,
                RetryOption::Delay(d) => self.config.delay = d,
                RetryOption::MaxDelay(d) => self.config.max_delay = d,
                RetryOption::Backoff(b) => self.config.backoff = b,
                RetryOption::Jitter(j) => self.config.jitter = j,
                RetryOption::RetryIf(p) => self.retry_if = Some(p),
                RetryOption::OnRetry(o) => self.on_retry = Some(o),
                RetryOption::Cancellation(t) => self.token = Some(t),
                RetryOption::Deadline(d) => self.deadline = Some(d),
                RetryOption::Timeout(d) => self.timeout = Some(d),
            }
        }
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    /// Set total attempts.
    #[must_use]
    pub fn with_max_attempts(self, n: u32) -> Self {
        self.transform([RetryOption::MaxAttempts(n)])
    }

    /// Set the base delay.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.transform([RetryOption::Delay(delay)])
    }

    /// Set the delay cap.
    #[must_use]
    pub fn with_max_delay(self, max: Duration) -> Self {
        self.transform([RetryOption::MaxDelay(max)])
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn with_backoff(self, backoff: Backoff) -> Self {
        self.transform([RetryOption::Backoff(backoff)])
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(self, jitter: bool) -> Self {
        self.transform([RetryOption::Jitter(jitter)])
    }

    /// Retry whenever `predicate` accepts the failure.
    #[must_use]
    pub fn with_retry_if(self, predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.transform([RetryOption::RetryIf(Arc::new(predicate))])
    }

    /// Observe accepted failures.
    #[must_use]
    pub fn with_on_retry(self, observer: impl Fn(u32, &Error) + Send + Sync + 'static) -> Self {
        self.transform([RetryOption::OnRetry(Arc::new(observer))])
    }

    /// Abort waits when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        self.transform([RetryOption::Cancellation(token)])
    }

    /// Abort waits at `deadline`.
    #[must_use]
    pub fn with_deadline(self, deadline: Instant) -> Self {
        self.transform([RetryOption::Deadline(deadline)])
    }

    /// Abort waits `timeout` after each invocation starts.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.transform([RetryOption::Timeout(timeout)])
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Configured total attempts.
    pub fn attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// The data part of this policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub(crate) fn observer(&self) -> Option<RetryObserver> {
        self.on_retry.clone()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run `op` until it succeeds, fails for good, or runs out of attempts.
    pub async fn execute<E, F, Fut>(&self, op: F) -> Result<(), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Error>,
    {
        self.execute_reply(op).await
    }

    /// Like [`execute`](Self::execute), returning the operation's value.
    ///
    /// On exhaustion or a non-retryable failure the operation's last error is
    /// returned as is. When the cancellation token or deadline fires during a
    /// delay the result wraps [`Cancelled`] or [`DeadlineExceeded`] instead.
    pub async fn execute_reply<T, E, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let deadline = self.effective_deadline();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Starting attempt");

            let error: Error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => e.into(),
            };

            if !self.should_retry(&error) {
                debug!(attempt, error = %error, "Failure is not retryable");
                return Err(error);
            }

            if let Some(observer) = &self.on_retry {
                observer(attempt, &error);
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "Retry failed: no more attempts");
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after delay"
            );

            if let Some(interrupted) = self.wait(delay, deadline, attempt, &error).await {
                return Err(interrupted);
            }
        }
    }

    fn should_retry(&self, error: &Error) -> bool {
        match &self.retry_if {
            Some(predicate) => predicate(error),
            None => chain::is_retryable(error),
        }
    }

    fn effective_deadline(&self) -> Option<Instant> {
        let relative = self.timeout.and_then(|t| Instant::now().checked_add(t));
        match (self.deadline, relative) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Backoff delay for `attempt`, capped, then jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.config.backoff.delay(attempt, self.config.delay);
        if !self.config.max_delay.is_zero() {
            delay = delay.min(self.config.max_delay);
        }
        if self.config.jitter && !delay.is_zero() {
            let half = u64::try_from(delay.as_nanos() / 2).unwrap_or(u64::MAX);
            delay = delay.saturating_add(Duration::from_nanos(fastrand::u64(0..=half)));
        }
        delay
    }

    /// Sleep for `delay` unless cancellation or the deadline comes first.
    async fn wait(
        &self,
        delay: Duration,
        deadline: Option<Instant>,
        attempt: u32,
        last: &Error,
    ) -> Option<Error> {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => {
                info!(attempt, "Retry cancelled");
                Some(interrupted(Error::new("retry cancelled").wrap(Cancelled), attempt, last))
            }
            () = expired => {
                info!(attempt, "Retry deadline exceeded");
                Some(
                    interrupted(Error::new("retry deadline exceeded").wrap(DeadlineExceeded), attempt, last)
                        .with_timeout(),
                )
            }
            () = tokio::time::sleep(delay) => None,
        }
    }
}

/// Annotate `err` with the state of its cancellation scope.
///
/// A passed `deadline` adds a `"deadline"` entry (milliseconds since the Unix
/// epoch) and the timeout flag; a cancelled `token` adds `"cancelled"`.
/// Returns `None` when there is no error.
///
/// ```rust
/// use faultline_error::Error;
/// use faultline_resilience::{CancellationToken, from_cancellation};
///
/// let token = CancellationToken::new();
/// token.cancel();
/// let err = from_cancellation(Some(Error::new("query failed")), Some(&token), None).unwrap();
/// assert!(err.has_context_key("cancelled"));
/// assert!(from_cancellation(None::<Error>, Some(&token), None).is_none());
/// ```
pub fn from_cancellation<E: Into<Error>>(
    err: Option<E>,
    token: Option<&CancellationToken>,
    deadline: Option<Instant>,
) -> Option<Error> {
    let mut error: Error = err?.into();
    if let Some(at) = deadline {
        let now = Instant::now();
        if now >= at {
            let passed = SystemTime::now()
                .checked_sub(now.saturating_duration_since(at))
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(Value::Null, |d| Value::from(d.as_millis() as u64));
            error = error.with("deadline", passed).with_timeout();
        }
    }
    if token.is_some_and(CancellationToken::is_cancelled) {
        error = error.with("cancelled", true);
    }
    Some(error)
}

fn interrupted(error: Error, attempts: u32, last: &Error) -> Error {
    error
        .with("attempts", attempts)
        .with("last_error", last.to_string())
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("config", &self.config)
            .field("retry_if", &self.retry_if.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("token", &self.token)
            .field("deadline", &self.deadline)
            .field("timeout", &self.timeout)
            .finish()
    }
}
