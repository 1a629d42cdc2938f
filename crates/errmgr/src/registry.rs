//! Named error templates, occurrence counters and threshold alerts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use faultline_error::format::render;
use faultline_error::{Arg, Error};
use parking_lot::RwLock;
use tracing::trace;

use crate::config::Config;
use crate::counter::Counters;
use crate::monitor::{AlertChannel, MONITOR_SIZE, Monitor};

/// Builds an error from positional template arguments.
pub type Constructor = Arc<dyn Fn(&[Arg]) -> Error + Send + Sync>;

pub(crate) struct Shared {
    config: ArcSwap<Config>,
    templates: DashMap<String, String>,
    codes: DashMap<String, i32>,
    thresholds: DashMap<String, u64>,
    counters: Counters,
    pub(crate) alerts: RwLock<HashMap<String, Arc<AlertChannel>>>,
}

/// Registry of named errors.
///
/// Cloning is cheap and every clone sees the same state.
///
/// ```rust
/// use faultline_error::args;
/// use faultline_errmgr::Registry;
///
/// let registry = Registry::new();
/// let not_found = registry.coded("ErrNotFound", "item %s not found", 404);
///
/// let err = not_found(args!["42"]);
/// assert_eq!(err.to_string(), "item 42 not found");
/// assert_eq!(err.code(), 404);
/// assert_eq!(registry.value("ErrNotFound"), 1);
/// ```
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry with metrics enabled.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Empty registry with `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: ArcSwap::from_pointee(config),
                templates: DashMap::new(),
                codes: DashMap::new(),
                thresholds: DashMap::new(),
                counters: Counters::default(),
                alerts: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide registry used by the free functions.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Swap the configuration.
    pub fn configure(&self, config: Config) {
        self.shared.config.store(Arc::new(config));
    }

    /// Current configuration.
    pub fn config(&self) -> Config {
        **self.shared.config.load()
    }

    fn metrics_enabled(&self) -> bool {
        !self.shared.config.load().disable_metrics
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Register `template` under `name`. Each call of the returned constructor
    /// renders the template, stamps name and template on a new error and
    /// counts one occurrence.
    pub fn define(&self, name: impl Into<String>, template: impl Into<String>) -> Constructor {
        let name = name.into();
        let template = template.into();
        self.shared
            .templates
            .insert(name.clone(), template.clone());
        if self.metrics_enabled() {
            self.shared.counters.register(&name);
        }

        let registry = self.clone();
        Arc::new(move |args: &[Arg]| {
            let err = Error::new(render(&template, args))
                .with_name(name.clone())
                .with_template(template.clone());
            registry.count(&name);
            err
        })
    }

    /// [`define`](Self::define) plus a fixed code.
    pub fn coded(
        &self,
        name: impl Into<String>,
        template: impl Into<String>,
        code: i32,
    ) -> Constructor {
        let name = name.into();
        self.shared.codes.insert(name.clone(), code);
        let base = self.define(name, template);
        Arc::new(move |args: &[Arg]| base(args).with_code(code))
    }

    /// [`define`](Self::define) plus a fixed category.
    pub fn categorized(
        &self,
        category: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Constructor {
        let category = category.into();
        let base = self.define(name, template);
        Arc::new(move |args: &[Arg]| base(args).with_category(category.clone()))
    }

    /// Count occurrences of errors built by `build` under `name`.
    pub fn tracked(
        &self,
        name: impl Into<String>,
        build: impl Fn(&[Arg]) -> Error + Send + Sync + 'static,
    ) -> Constructor {
        let name = name.into();
        if self.metrics_enabled() {
            self.shared.counters.register(&name);
        }
        let registry = self.clone();
        Arc::new(move |args: &[Arg]| {
            registry.count(&name);
            build(args)
        })
    }

    /// Code registered through [`coded`](Self::coded).
    pub fn code_for(&self, name: &str) -> Option<i32> {
        self.shared.codes.get(name).map(|code| *code)
    }

    /// Template registered through [`define`](Self::define) and friends.
    pub fn template_for(&self, name: &str) -> Option<String> {
        self.shared.templates.get(name).map(|t| t.clone())
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    fn count(&self, name: &str) {
        if self.metrics_enabled() {
            self.inc(name);
        }
    }

    /// Count one occurrence of `name` and return the new total. Crossing the
    /// name's threshold queues an alert on its monitor, if any.
    pub fn inc(&self, name: &str) -> u64 {
        let total = self.shared.counters.increment(name);

        let threshold = self.shared.thresholds.get(name).map(|t| *t);
        if let Some(threshold) = threshold
            && total >= threshold
        {
            let channel = self.shared.alerts.read().get(name).cloned();
            if let Some(channel) = channel {
                let alert = Error::new(format!("{name} count exceeded threshold: {total}"))
                    .with_name(name)
                    .with_count(total);
                channel.send(name, alert);
            }
        }
        total
    }

    /// Current count for `name`.
    pub fn value(&self, name: &str) -> u64 {
        self.shared.counters.value(name)
    }

    /// Make `name` known without counting.
    pub fn register_name(&self, name: &str) {
        self.shared.counters.register(name);
    }

    /// Every name with a counter, sorted.
    pub fn list_names(&self) -> Vec<String> {
        self.shared.counters.names()
    }

    /// Positive counts by name; `None` when metrics are disabled or nothing
    /// has been counted.
    pub fn metrics(&self) -> Option<HashMap<String, u64>> {
        if !self.metrics_enabled() {
            return None;
        }
        let snapshot = self.shared.counters.snapshot();
        (!snapshot.is_empty()).then_some(snapshot)
    }

    /// Zero every counter, keeping registrations.
    pub fn reset(&self) {
        if self.metrics_enabled() {
            self.shared.counters.reset_all();
        }
    }

    /// Zero one counter.
    pub fn reset_counter(&self, name: &str) {
        if self.metrics_enabled() {
            self.shared.counters.reset(name);
        }
    }

    // ------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------

    /// Alert once `name`'s count reaches `threshold`.
    pub fn set_threshold(&self, name: impl Into<String>, threshold: u64) {
        self.shared.thresholds.insert(name.into(), threshold);
    }

    /// Threshold for `name`, if set.
    pub fn get_threshold(&self, name: &str) -> Option<u64> {
        self.shared.thresholds.get(name).map(|t| *t)
    }

    /// Stop alerting for `name`.
    pub fn remove_threshold(&self, name: &str) {
        self.shared.thresholds.remove(name);
    }

    // ------------------------------------------------------------------
    // Monitors
    // ------------------------------------------------------------------

    /// Monitor for `name` with the default buffer.
    pub fn new_monitor(&self, name: impl Into<String>) -> Monitor {
        self.new_monitor_buffered(name, MONITOR_SIZE)
    }

    /// Monitor for `name`. An open channel for the name is shared and its
    /// buffer size kept; otherwise a new one with `buffer` slots (at least
    /// one) is opened.
    pub fn new_monitor_buffered(&self, name: impl Into<String>, buffer: usize) -> Monitor {
        let name = name.into();
        let mut alerts = self.shared.alerts.write();
        let channel = Arc::clone(alerts.entry(name.clone()).or_insert_with(|| {
            trace!(name = %name, buffer, "Monitor opened");
            Arc::new(AlertChannel::new(buffer))
        }));
        drop(alerts);
        Monitor::new(name, channel, Arc::downgrade(&self.shared))
    }

    /// Close and unregister the monitor channel for `name`.
    pub fn close_monitor(&self, name: &str) {
        let removed = self.shared.alerts.write().remove(name);
        if let Some(channel) = removed {
            channel.close();
            trace!(name, "Monitor closed");
        }
    }

    /// Close every monitor and forget all templates, codes, thresholds and
    /// counters.
    pub fn teardown(&self) {
        let channels: Vec<_> = self.shared.alerts.write().drain().collect();
        for (_, channel) in channels {
            channel.close();
        }
        self.shared.templates.clear();
        self.shared.codes.clear();
        self.shared.thresholds.clear();
        self.shared.counters.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config())
            .field("templates", &self.shared.templates.len())
            .field("thresholds", &self.shared.thresholds.len())
            .field("monitors", &self.shared.alerts.read().len())
            .finish()
    }
}
