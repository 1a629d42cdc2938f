//! # Faultline resilience
//!
//! Async execution helpers built on [`faultline_error::Error`]:
//!
//! - [`Retry`]: re-run a fallible operation with fixed, linear or exponential
//!   backoff, jitter, a custom retry predicate, an observer hook and
//!   cancellation through a [`CancellationToken`] or deadline
//! - [`Chain`]: run steps in order with optional steps, per-step retries,
//!   per-step metadata and a chain-wide timeout
//!
//! ## Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use faultline_resilience::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let retry = Retry::default()
//!     .with_max_attempts(2)
//!     .with_delay(Duration::from_millis(1));
//!
//! let err = retry
//!     .execute(|| async { Err::<(), _>(Error::new("not flagged")) })
//!     .await
//!     .unwrap_err();
//! assert_eq!(err.to_string(), "not flagged");
//! # });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// === Core ===
mod backoff;
mod chain;
mod retry;

// === Public API Exports ===

pub use backoff::Backoff;
pub use chain::Chain;
pub use retry::{
    Retry, RetryConfig, RetryObserver, RetryOption, RetryPredicate, from_cancellation,
};
pub use tokio_util::sync::CancellationToken;

/// Everything most callers need.
pub mod prelude {
    pub use crate::{
        Backoff, CancellationToken, Chain, Retry, RetryConfig, RetryOption, from_cancellation,
    };
    pub use faultline_error::{Cancelled, DeadlineExceeded, Error, Result, chain};
}
