//! Cancellation sentinels.
//!
//! Retry and step-runner errors wrap one of these so callers can tell an
//! interrupted operation from one that ran out of attempts.

/// The operation was cancelled by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// The operation ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;
