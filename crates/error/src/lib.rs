//! # Faultline errors
//!
//! Context-carrying error values for services that need more than a string:
//!
//! - [`Error`]: message, cause, key/value context, optional stack, name,
//!   category, code and an occurrence counter, with pooled allocation
//! - [`chain`]: walking, matching and unwrapping cause chains that mix custom
//!   and foreign errors
//! - [`MultiError`]: a thread-safe aggregate with limits, sampling and custom
//!   rendering
//! - [`format`]: runtime `%`-verb templates, including `%w` wrapping
//!
//! ## Quick start
//!
//! ```rust
//! use faultline_error::prelude::*;
//!
//! fn load(id: u64) -> Result<()> {
//!     let io = std::io::Error::other("connection reset");
//!     Err(Error::new("load user").with("user_id", id).with_code(503).wrap(io))
//! }
//!
//! let err = load(7).unwrap_err();
//! assert_eq!(err.to_string(), "load user: connection reset");
//! assert_eq!(chain::code(&err), 503);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;

// === Core ===
pub mod chain;
pub mod config;
pub mod context;
mod error;
pub mod format;
mod multi;
mod pool;
mod sentinel;
mod stack;

// === Public API Exports ===

pub use config::{Config, ConfigError, configure, current_config};
pub use error::{Error, format_error, wrap, wrapf};
pub use format::Arg;
pub use multi::{Formatter, MultiError};
pub use pool::{PoolStats, pool_stats, warm_pool};
pub use sentinel::{Cancelled, DeadlineExceeded};
pub use stack::warm_stack_pool;

/// A cause shared between errors, aggregates and threads.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// `Result` with [`Error`] as the failure type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything most callers need.
pub mod prelude {
    pub use crate::chain;
    pub use crate::{
        Arg, Cancelled, DeadlineExceeded, Error, MultiError, Result, SharedError, args, wrap,
        wrapf,
    };
}
