//! # Faultline error manager
//!
//! Named, templated errors with occurrence counting and threshold alerts.
//!
//! - [`Registry`]: templates, codes, counters and thresholds behind one
//!   cheap-to-clone handle, plus a process-wide instance
//!   ([`Registry::global`]) driven by the free functions in this crate
//! - [`Monitor`]: a receiver for alerts raised when a name's count reaches
//!   its threshold
//! - [`common`]: predefined categories, codes and errors
//!
//! ## Quick start
//!
//! ```rust
//! use faultline_error::args;
//! use faultline_errmgr::Registry;
//!
//! let registry = Registry::new();
//! let db_timeout = registry.define("DbTimeout", "query on %s timed out");
//! registry.set_threshold("DbTimeout", 2);
//! let monitor = registry.new_monitor("DbTimeout");
//!
//! let _ = db_timeout(args!["users"]);
//! assert!(monitor.try_recv().is_none());
//!
//! let _ = db_timeout(args!["orders"]);
//! let alert = monitor.try_recv().unwrap();
//! assert_eq!(alert.to_string(), "DbTimeout count exceeded threshold: 2");
//! assert_eq!(alert.count(), 2);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// === Core ===
pub mod common;
mod config;
mod counter;
mod global;
mod monitor;
mod registry;

// === Public API Exports ===

pub use config::Config;
pub use global::{
    categorized, close_monitor, code_for, coded, configure, copy, define, get_threshold, metrics,
    new_monitor, new_monitor_buffered, remove_threshold, reset, reset_counter, set_threshold,
    tracked,
};
pub use monitor::{MONITOR_SIZE, Monitor};
pub use registry::{Constructor, Registry};

/// Everything most callers need.
pub mod prelude {
    pub use crate::common::{category, code};
    pub use crate::{Constructor, Monitor, Registry};
    pub use faultline_error::{Arg, Error, args};
}
