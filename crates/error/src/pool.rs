//! Free list of error allocations.
//!
//! [`Error::free`](crate::Error::free) clears an error's fields and parks its
//! allocation here; the next constructor picks it up instead of allocating.
//! Dropping an error without `free` just deallocates it.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::current_config;
use crate::error::Inner;

static POOL: Mutex<Vec<Box<Inner>>> = Mutex::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static HITS: AtomicU64 = AtomicU64::new(0);
static MISSES: AtomicU64 = AtomicU64::new(0);
static RELEASES: AtomicU64 = AtomicU64::new(0);

/// Counters describing pool usage since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that had to allocate.
    pub misses: u64,
    /// Allocations returned through `free`.
    pub releases: u64,
    /// Idle error allocations right now.
    pub idle: usize,
    /// Idle stack buffers right now.
    pub idle_stacks: usize,
}

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Take a cleared allocation carrying a fresh identity.
pub(crate) fn acquire() -> Box<Inner> {
    let id = next_id();
    if !current_config().disable_pooling
        && let Some(mut inner) = POOL.lock().pop()
    {
        HITS.fetch_add(1, Ordering::Relaxed);
        inner.revive(id);
        return inner;
    }
    MISSES.fetch_add(1, Ordering::Relaxed);
    Box::new(Inner::blank(id))
}

/// Clear `inner` and park it for reuse.
pub(crate) fn release(mut inner: Box<Inner>) {
    inner.clear();
    let config = current_config();
    if config.disable_pooling {
        return;
    }
    RELEASES.fetch_add(1, Ordering::Relaxed);
    let mut pool = POOL.lock();
    if pool.len() < config.pool_capacity {
        pool.push(inner);
    }
}

/// Pre-allocate up to `count` idle errors.
pub fn warm_pool(count: usize) {
    let config = current_config();
    if config.disable_pooling {
        return;
    }
    let mut pool = POOL.lock();
    let room = config.pool_capacity.saturating_sub(pool.len());
    for _ in 0..count.min(room) {
        let mut inner = Box::new(Inner::blank(0));
        inner.clear();
        pool.push(inner);
    }
}

/// Snapshot of pool counters.
pub fn pool_stats() -> PoolStats {
    PoolStats {
        hits: HITS.load(Ordering::Relaxed),
        misses: MISSES.load(Ordering::Relaxed),
        releases: RELEASES.load(Ordering::Relaxed),
        idle: POOL.lock().len(),
        idle_stacks: crate::stack::stack_pool_len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = next_id();
        let b = next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn released_allocation_is_reused_cleared() {
        let before = pool_stats();
        let err = crate::Error::new("pooled").with("k", 1).with_code(500);
        err.free();
        let after_free = pool_stats();
        assert!(after_free.releases > before.releases);

        let fresh = crate::Error::new("");
        assert_eq!(fresh.message(), "");
        assert_eq!(fresh.code(), 0);
        assert!(fresh.context().is_empty());
        assert!(fresh.cause().is_none());
    }

    #[test]
    fn warm_pool_fills_free_list() {
        warm_pool(4);
        assert!(pool_stats().idle > 0);
    }
}
