//! Delay growth between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows from one retry to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// The base delay every time.
    Fixed,
    /// `base * attempt`.
    Linear,
    /// `base * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

impl Backoff {
    /// Delay after the 1-indexed `attempt` failed. Saturates at
    /// [`Duration::MAX`] instead of overflowing.
    pub fn delay(self, attempt: u32, base: Duration) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed => base,
            Self::Linear => base.saturating_mul(attempt),
            Self::Exponential => match 2u32.checked_pow(attempt - 1) {
                Some(factor) => base.saturating_mul(factor),
                None if base.is_zero() => Duration::ZERO,
                None => Duration::MAX,
            },
        }
    }
}
