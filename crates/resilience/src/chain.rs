//! Sequential step runner.
//!
//! A [`Chain`] runs async steps in order. Each step can be marked optional,
//! retried, tagged with metadata or given its own timeout; the chain as a
//! whole can have a deadline and a cancellation token.
//!
//! ```rust
//! use faultline_error::Error;
//! use faultline_resilience::Chain;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let mut chain = Chain::new()
//!     .step(|| async { Ok::<_, Error>(()) })
//!     .step(|| async { Err::<(), _>(Error::new("cache miss")) })
//!     .optional()
//!     .step(|| async { Ok::<_, Error>(()) });
//!
//! assert!(chain.run().await.is_ok());
//! assert_eq!(chain.errors().len(), 1);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use faultline_error::{Cancelled, DeadlineExceeded, Error, MultiError, chain};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::backoff::Backoff;
use crate::retry::{Retry, RetryOption};

type StepFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type StepFn = Box<dyn FnMut() -> StepFuture + Send>;

struct Step {
    func: StepFn,
    optional: bool,
    retry: Option<Retry>,
    context: Vec<(String, Value)>,
    category: Option<String>,
    code: Option<i32>,
    log_on_fail: bool,
    timeout: Option<Duration>,
}

impl Step {
    fn new(func: StepFn) -> Self {
        Self {
            func,
            optional: false,
            retry: None,
            context: Vec::new(),
            category: None,
            code: None,
            log_on_fail: false,
            timeout: None,
        }
    }

    /// One attempt, or several when a retry policy is attached.
    async fn attempt(&mut self) -> Result<(), Error> {
        let timeout = self.timeout;
        let func = &mut self.func;
        match self.retry.clone() {
            Some(retry) => retry.execute(|| invoke(func, timeout)).await,
            None => invoke(func, timeout).await,
        }
    }

    /// Stack and metadata on top of the raw failure.
    fn enhance(&self, error: Error) -> Error {
        let mut enhanced = if error.has_stack() {
            error
        } else {
            error.with_stack()
        };
        for (key, value) in &self.context {
            enhanced = enhanced.with(key.clone(), value.clone());
        }
        if let Some(category) = &self.category {
            enhanced = enhanced.with_category(category.clone());
        }
        if let Some(code) = self.code {
            enhanced = enhanced.with_code(code);
        }
        enhanced
    }
}

fn invoke(func: &mut StepFn, timeout: Option<Duration>) -> StepFuture {
    let fut = func();
    match timeout {
        None => fut,
        Some(limit) => Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::new("step timed out")
                    .wrap(DeadlineExceeded)
                    .with("timeout_ms", limit.as_millis() as u64)
                    .with_timeout()),
            }
        }),
    }
}

enum Outcome {
    Done,
    Failed(Error),
    Interrupted(Error),
}

// =============================================================================
// Chain
// =============================================================================

/// Ordered async steps with per-step failure policy.
pub struct Chain {
    steps: Vec<Step>,
    errors: Vec<Error>,
    timeout: Option<Duration>,
    max_errors: Option<usize>,
    auto_wrap: bool,
    token: Option<CancellationToken>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// Empty chain with auto-wrapping enabled.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            errors: Vec::new(),
            timeout: None,
            max_errors: None,
            auto_wrap: true,
            token: None,
        }
    }

    /// Deadline for a whole run, measured from its start.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stop [`run_all`](Self::run_all) after this many failures.
    #[must_use]
    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = Some(max);
        self
    }

    /// Whether failures get a stack and the step's metadata.
    #[must_use]
    pub fn with_auto_wrap(mut self, enabled: bool) -> Self {
        self.auto_wrap = enabled;
        self
    }

    /// Abort the running step when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Append a step.
    #[must_use]
    pub fn step<F, Fut, E>(mut self, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<Error> + 'static,
    {
        let func: StepFn = Box::new(move || -> StepFuture {
            let fut = f();
            Box::pin(async move { fut.await.map_err(Into::into) })
        });
        self.steps.push(Step::new(func));
        self
    }

    fn last_step(&mut self, modify: impl FnOnce(&mut Step)) {
        if let Some(step) = self.steps.last_mut() {
            modify(step);
        }
    }

    /// The last step's failure does not stop [`run`](Self::run).
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.last_step(|s| s.optional = true);
        self
    }

    /// Retry the last step with a fixed delay. Failures are retried
    /// regardless of their retryable flag unless `options` say otherwise.
    /// An observer passed in `options` runs after the step's retry warning.
    #[must_use]
    pub fn retry(
        mut self,
        max_attempts: u32,
        delay: Duration,
        options: impl IntoIterator<Item = RetryOption>,
    ) -> Self {
        let policy = Retry::new([
            RetryOption::MaxAttempts(max_attempts),
            RetryOption::Delay(delay),
            RetryOption::Backoff(Backoff::Fixed),
            RetryOption::Jitter(false),
            RetryOption::RetryIf(Arc::new(|_: &Error| true)),
        ])
        .transform(options);
        let observer = policy.observer();
        let max_attempts = policy.attempts();
        let retry = policy.with_on_retry(move |attempt, err| {
            warn!(
                attempt,
                max_attempts,
                error = %err,
                "Retrying step (attempt {attempt}/{max_attempts})"
            );
            if let Some(observer) = &observer {
                observer(attempt, err);
            }
        });
        self.last_step(|s| s.retry = Some(retry));
        self
    }

    /// Context entry attached to the last step's failure.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let entry = (key.into(), value.into());
        self.last_step(|s| s.context.push(entry));
        self
    }

    /// Category for the last step's failure.
    #[must_use]
    pub fn tag(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.last_step(|s| s.category = Some(category));
        self
    }

    /// Code for the last step's failure.
    #[must_use]
    pub fn code(mut self, code: i32) -> Self {
        self.last_step(|s| s.code = Some(code));
        self
    }

    /// Log the last step's failure.
    #[must_use]
    pub fn log_on_fail(mut self) -> Self {
        self.last_step(|s| s.log_on_fail = true);
        self
    }

    /// Per-attempt timeout for the last step.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.last_step(|s| s.timeout = Some(timeout));
        self
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// Run the steps in order until one that is not optional fails.
    pub async fn run(&mut self) -> Result<(), Error> {
        self.errors.clear();
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));

        for index in 0..self.steps.len() {
            match self.execute_step(index, deadline).await {
                Outcome::Done => {}
                Outcome::Interrupted(err) => {
                    self.errors.push(err.clone());
                    return Err(err);
                }
                Outcome::Failed(err) => {
                    let step = &self.steps[index];
                    self.errors.push(err.clone());
                    if step.optional {
                        if step.log_on_fail {
                            log_failure(&err, true);
                        }
                        continue;
                    }
                    if step.log_on_fail {
                        log_failure(&err, false);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Run every step and collect failures. `None` means nothing failed.
    pub async fn run_all(&mut self) -> Option<MultiError> {
        self.errors.clear();
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let collected = MultiError::new();

        for index in 0..self.steps.len() {
            if let Some(max) = self.max_errors
                && self.errors.len() >= max
            {
                break;
            }
            match self.execute_step(index, deadline).await {
                Outcome::Done => {}
                Outcome::Interrupted(err) => {
                    collected.add(err.clone());
                    self.errors.push(err);
                    break;
                }
                Outcome::Failed(err) => {
                    if self.steps[index].log_on_fail {
                        log_failure(&err, self.steps[index].optional);
                    }
                    collected.add(err.clone());
                    self.errors.push(err);
                }
            }
        }

        (collected.count() > 0).then_some(collected)
    }

    async fn execute_step(&mut self, index: usize, deadline: Option<Instant>) -> Outcome {
        let token = self.token.clone();
        let step = &mut self.steps[index];

        let result = {
            let cancelled = async {
                match &token {
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
                    return Outcome::Interrupted(Error::new("chain cancelled").wrap(Cancelled));
                }
                () = expired => {
                    return Outcome::Interrupted(
                        Error::new("chain deadline exceeded")
                            .wrap(DeadlineExceeded)
                            .with_timeout(),
                    );
                }
                result = step.attempt() => result,
            }
        };

        match result {
            Ok(()) => Outcome::Done,
            Err(err) if self.auto_wrap => Outcome::Failed(self.steps[index].enhance(err)),
            Err(err) => Outcome::Failed(err),
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Drop all steps and recorded failures; options stay.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.errors.clear();
    }

    /// Failures recorded by the last run, in order.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Most recent recorded failure.
    pub fn last_error(&self) -> Option<&Error> {
        self.errors.last()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// No steps yet.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether the last run recorded any failure.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn log_failure(err: &Error, optional: bool) {
    let category = chain::category(err).unwrap_or_default();
    let code = chain::code(err);
    let mut pairs: Vec<_> = err.context().into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let context = pairs
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect::<Vec<_>>()
        .join(",");

    if optional {
        warn!(error = %err, category = %category, code, context = %context, "Optional step failed");
    } else {
        error!(error = %err, category = %category, code, context = %context, "Chain stopped due to error in step");
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("steps", &self.steps.len())
            .field("errors", &self.errors)
            .field("timeout", &self.timeout)
            .field("max_errors", &self.max_errors)
            .field("auto_wrap", &self.auto_wrap)
            .finish()
    }
}
