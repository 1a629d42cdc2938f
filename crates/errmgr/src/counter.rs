//! Per-name occurrence counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Named atomic counters. The map is sharded by `DashMap`; each count is a
/// standalone atomic so increments never take a map write lock after the
/// first registration.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    counts: DashMap<String, Arc<AtomicU64>>,
}

impl Counters {
    fn slot(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(existing) = self.counts.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.counts
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .value(),
        )
    }

    /// Make `name` known with a zero count, keeping any existing count.
    pub(crate) fn register(&self, name: &str) {
        if !self.counts.contains_key(name) {
            self.counts
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        }
    }

    /// Add one and return the new total.
    pub(crate) fn increment(&self, name: &str) -> u64 {
        self.slot(name).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn value(&self, name: &str) -> u64 {
        self.counts
            .get(name)
            .map_or(0, |count| count.load(Ordering::Acquire))
    }

    pub(crate) fn reset(&self, name: &str) {
        if let Some(count) = self.counts.get(name) {
            count.store(0, Ordering::Release);
        }
    }

    pub(crate) fn reset_all(&self) {
        for entry in &self.counts {
            entry.value().store(0, Ordering::Release);
        }
    }

    /// Registered names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counts.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Names with a positive count.
    pub(crate) fn snapshot(&self) -> HashMap<String, u64> {
        self.counts
            .iter()
            .filter_map(|entry| {
                let count = entry.value().load(Ordering::Acquire);
                (count > 0).then(|| (entry.key().clone(), count))
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.counts.clear();
    }
}
