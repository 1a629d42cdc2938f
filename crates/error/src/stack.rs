//! Stack capture with pooled frame buffers.
//!
//! Capture records raw instruction pointers only; symbol resolution is
//! deferred until a stack is actually rendered.

use std::ffi::c_void;

use parking_lot::Mutex;

use crate::config::{Config, current_config};

/// Frames captured beyond `stack_depth` so filtering still leaves enough.
const CAPTURE_SLACK: usize = 16;

static FRAME_POOL: Mutex<Vec<Vec<usize>>> = Mutex::new(Vec::new());

/// Symbol prefixes that never describe caller code.
const INTERNAL_PREFIXES: &[&str] = &[
    "backtrace::",
    "faultline_error::stack::",
    "faultline_error::error::Error::",
    "faultline_error::pool::",
    "std::rt::",
    "std::sys",
    "std::panic",
    "std::thread::",
    "core::ops::function::",
    "core::panic",
    "__rust",
    "<alloc::boxed::Box",
];

/// Captured program locations, outermost caller last.
#[derive(Debug, Default)]
pub(crate) struct Stack {
    frames: Vec<usize>,
}

impl Clone for Stack {
    fn clone(&self) -> Self {
        let mut frames = acquire_buffer(self.frames.len());
        frames.extend_from_slice(&self.frames);
        Self { frames }
    }
}

impl Stack {
    /// Capture the current call stack.
    #[inline(never)]
    pub(crate) fn capture() -> Self {
        let config = current_config();
        let limit = config.stack_depth + CAPTURE_SLACK;
        let mut frames = acquire_buffer(limit);
        backtrace::trace(|frame| {
            frames.push(frame.ip() as usize);
            frames.len() < limit
        });
        Self { frames }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Resolve frames into `"function file:line"` strings.
    pub(crate) fn render(&self) -> Vec<String> {
        render_frames(&self.frames, &current_config())
    }

    /// Hand the buffer back to the frame pool.
    pub(crate) fn release(self) {
        release_buffer(self.frames);
    }
}

fn render_frames(frames: &[usize], config: &Config) -> Vec<String> {
    let resolved: Vec<(Option<String>, String)> = frames.iter().map(|&ip| resolve(ip)).collect();

    let mut out: Vec<String> = if config.filter_internal {
        resolved
            .iter()
            .filter(|(name, _)| !name.as_deref().is_some_and(is_internal))
            .map(|(_, line)| line.clone())
            .collect()
    } else {
        Vec::new()
    };
    // Filtering everything away is less useful than showing the raw frames.
    if out.is_empty() {
        out = resolved.into_iter().map(|(_, line)| line).collect();
    }
    out.truncate(config.stack_depth);
    out
}

fn resolve(ip: usize) -> (Option<String>, String) {
    let mut name = None;
    let mut location = None;
    backtrace::resolve(ip as *mut c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| format!("{n:#}"));
        }
        if location.is_none()
            && let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno())
        {
            location = Some(format!("{}:{line}", file.display()));
        }
    });

    let line = match (&name, location) {
        (Some(name), Some(location)) => format!("{name} {location}"),
        (Some(name), None) => name.clone(),
        (None, _) => format!("{ip:#x}"),
    };
    (name, line)
}

/// Whether a resolved symbol belongs to the runtime or to capture itself.
pub(crate) fn is_internal(symbol: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|prefix| symbol.starts_with(prefix))
}

fn acquire_buffer(capacity: usize) -> Vec<usize> {
    if !current_config().disable_pooling
        && let Some(mut buf) = FRAME_POOL.lock().pop()
    {
        buf.clear();
        buf.reserve(capacity);
        return buf;
    }
    Vec::with_capacity(capacity)
}

fn release_buffer(mut buf: Vec<usize>) {
    let config = current_config();
    if config.disable_pooling {
        return;
    }
    buf.clear();
    let mut pool = FRAME_POOL.lock();
    if pool.len() < config.pool_capacity {
        pool.push(buf);
    }
}

/// Pre-populate the frame buffer pool with `count` buffers.
pub fn warm_stack_pool(count: usize) {
    let config = current_config();
    if config.disable_pooling {
        return;
    }
    let mut pool = FRAME_POOL.lock();
    let room = config.pool_capacity.saturating_sub(pool.len());
    for _ in 0..count.min(room) {
        pool.push(Vec::with_capacity(config.stack_depth + CAPTURE_SLACK));
    }
}

/// Number of idle frame buffers.
pub fn stack_pool_len() -> usize {
    FRAME_POOL.lock().len()
}
