//! Free functions over [`Registry::global`].

use std::collections::HashMap;

use faultline_error::{Arg, Error};

use crate::config::Config;
use crate::monitor::Monitor;
use crate::registry::{Constructor, Registry};

/// See [`Registry::configure`].
pub fn configure(config: Config) {
    Registry::global().configure(config);
}

/// See [`Registry::define`].
pub fn define(name: &str, template: &str) -> Constructor {
    Registry::global().define(name, template)
}

/// See [`Registry::coded`].
pub fn coded(name: &str, template: &str, code: i32) -> Constructor {
    Registry::global().coded(name, template, code)
}

/// See [`Registry::categorized`].
pub fn categorized(category: &str, name: &str, template: &str) -> Constructor {
    Registry::global().categorized(category, name, template)
}

/// See [`Registry::tracked`].
pub fn tracked(
    name: &str,
    build: impl Fn(&[Arg]) -> Error + Send + Sync + 'static,
) -> Constructor {
    Registry::global().tracked(name, build)
}

/// See [`Registry::code_for`].
pub fn code_for(name: &str) -> Option<i32> {
    Registry::global().code_for(name)
}

/// See [`Registry::metrics`].
pub fn metrics() -> Option<HashMap<String, u64>> {
    Registry::global().metrics()
}

/// See [`Registry::reset`].
pub fn reset() {
    Registry::global().reset();
}

/// See [`Registry::reset_counter`].
pub fn reset_counter(name: &str) {
    Registry::global().reset_counter(name);
}

/// See [`Registry::set_threshold`].
pub fn set_threshold(name: &str, threshold: u64) {
    Registry::global().set_threshold(name, threshold);
}

/// See [`Registry::get_threshold`].
pub fn get_threshold(name: &str) -> Option<u64> {
    Registry::global().get_threshold(name)
}

/// See [`Registry::remove_threshold`].
pub fn remove_threshold(name: &str) {
    Registry::global().remove_threshold(name);
}

/// See [`Registry::new_monitor`].
pub fn new_monitor(name: &str) -> Monitor {
    Registry::global().new_monitor(name)
}

/// See [`Registry::new_monitor_buffered`].
pub fn new_monitor_buffered(name: &str, buffer: usize) -> Monitor {
    Registry::global().new_monitor_buffered(name, buffer)
}

/// See [`Registry::close_monitor`].
pub fn close_monitor(name: &str) {
    Registry::global().close_monitor(name);
}

/// An independent copy of `err` with a fresh identity.
pub fn copy(err: &Error) -> Error {
    err.copy()
}
