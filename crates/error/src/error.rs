//! The [`Error`] value.
//!
//! An `Error` owns a boxed [`Inner`] that can be recycled through the pool
//! with [`Error::free`]. Builders take and return `self`; context can also be
//! written through `&self` because it sits behind a per-instance lock, which
//! lets an `Arc<Error>` shared between threads accept concurrent inserts.

// Standard library
use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// External dependencies
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

// Internal
use crate::SharedError;
use crate::config::current_config;
use crate::context::{ContextStore, MISSING, RETRYABLE_KEY, TIMEOUT_KEY, key_string};
use crate::format::{self, Arg, Rendered};
use crate::pool;
use crate::sentinel::{Cancelled, DeadlineExceeded};
use crate::stack::Stack;

// ============================================================================
// Storage
// ============================================================================

pub(crate) struct Inner {
    pub(crate) id: u64,
    pub(crate) message: String,
    pub(crate) name: String,
    pub(crate) template: String,
    pub(crate) category: String,
    pub(crate) code: i32,
    pub(crate) count: AtomicU64,
    pub(crate) cause: Option<SharedError>,
    /// The cause's text is already part of `message` (`%w` construction).
    pub(crate) inline_cause: bool,
    pub(crate) context: Mutex<ContextStore>,
    pub(crate) stack: Option<Stack>,
    #[cfg(debug_assertions)]
    released: bool,
}

impl Inner {
    pub(crate) fn blank(id: u64) -> Self {
        Self {
            id,
            message: String::new(),
            name: String::new(),
            template: String::new(),
            category: String::new(),
            code: 0,
            count: AtomicU64::new(0),
            cause: None,
            inline_cause: false,
            context: Mutex::new(ContextStore::default()),
            stack: None,
            #[cfg(debug_assertions)]
            released: false,
        }
    }

    /// Bring a parked allocation back into service.
    pub(crate) fn revive(&mut self, id: u64) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.released, "pooled error was not released");
            debug_assert!(self.message.is_empty() && self.cause.is_none());
            self.released = false;
        }
        self.id = id;
    }

    /// Reset every field. Strings keep their capacity.
    pub(crate) fn clear(&mut self) {
        self.id = 0;
        self.message.clear();
        self.name.clear();
        self.template.clear();
        self.category.clear();
        self.code = 0;
        *self.count.get_mut() = 0;
        self.cause = None;
        self.inline_cause = false;
        self.context.get_mut().clear();
        if let Some(stack) = self.stack.take() {
            stack.release();
        }
        #[cfg(debug_assertions)]
        {
            self.released = true;
        }
    }
}

// ============================================================================
// Error
// ============================================================================

/// Context-carrying error with an optional cause, stack and classification.
///
/// ```
/// use faultline_error::Error;
///
/// let db = Error::new("connection refused").with_code(503);
/// let err = Error::new("load user").with("user_id", 42).wrap(db);
/// assert_eq!(err.to_string(), "load user: connection refused");
/// ```
pub struct Error {
    inner: Box<Inner>,
}

impl Error {
    fn blank() -> Self {
        Self {
            inner: pool::acquire(),
        }
    }

    /// Create an error with `message` and no stack.
    pub fn new(message: impl Into<String>) -> Self {
        let mut err = Self::blank();
        let message = message.into();
        if err.inner.message.capacity() >= message.len() {
            err.inner.message.push_str(&message);
        } else {
            err.inner.message = message;
        }
        err
    }

    /// Create an error from a runtime template.
    ///
    /// A single `%w` takes an error argument, inlines its text and makes it
    /// the cause. Malformed `%w` usage produces an error describing the
    /// problem instead.
    ///
    /// ```
    /// use faultline_error::{Error, args};
    ///
    /// let io = Error::new("disk full");
    /// let err = Error::newf("write %s: %w", args!["log.txt", io]);
    /// assert_eq!(err.to_string(), "write log.txt: disk full");
    /// assert!(err.cause().is_some());
    /// ```
    pub fn newf(template: &str, args: &[Arg]) -> Self {
        match format::render_wrapping(template, args) {
            Ok(Rendered { text, cause }) => {
                let mut err = Self::new(text);
                if let Some(cause) = cause {
                    err.inner.cause = Some(cause);
                    err.inner.inline_cause = true;
                }
                err
            }
            Err(fault) => Self::new(fault.describe(template)),
        }
    }

    /// Create a named error with a captured stack.
    pub fn named(name: impl Into<String>) -> Self {
        let mut err = Self::blank();
        err.inner.name = name.into();
        err.inner.stack = Some(Stack::capture());
        err
    }

    /// Create an error with `message` and a captured stack.
    pub fn trace(message: impl Into<String>) -> Self {
        let mut err = Self::new(message);
        err.inner.stack = Some(Stack::capture());
        err
    }

    /// Wrap any error without adding a message of its own.
    pub fn from_source<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::blank().wrap(cause)
    }

    /// Format a message from `template` and wrap `cause` under it.
    pub fn wrap_with<E>(cause: E, template: &str, args: &[Arg]) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(format::render(template, args)).wrap(cause)
    }

    /// Independent duplicate with a fresh identity.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.duplicate(pool::next_id())
    }

    fn duplicate(&self, id: u64) -> Self {
        let mut inner = pool::acquire();
        inner.id = id;
        inner.message.push_str(&self.inner.message);
        inner.name.push_str(&self.inner.name);
        inner.template.push_str(&self.inner.template);
        inner.category.push_str(&self.inner.category);
        inner.code = self.inner.code;
        *inner.count.get_mut() = self.count();
        inner.cause = self.inner.cause.clone();
        inner.inline_cause = self.inner.inline_cause;
        *inner.context.get_mut() = self.inner.context.lock().clone();
        inner.stack = self.inner.stack.clone();
        Self { inner }
    }

    /// Clear the error and return its allocation to the pool.
    pub fn free(self) {
        pool::release(self.inner);
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    /// Add one context entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let threshold = current_config().context_size;
        self.inner
            .context
            .get_mut()
            .insert(key.into(), value.into(), threshold);
        self
    }

    /// Add alternating key/value entries.
    ///
    /// Non-string keys are stringified; a trailing key without a value maps
    /// to `"(MISSING)"`.
    #[must_use]
    pub fn with_kv(mut self, pairs: &[Value]) -> Self {
        let threshold = current_config().context_size;
        let context = self.inner.context.get_mut();
        for pair in pairs.chunks(2) {
            let key = key_string(&pair[0]);
            let value = pair
                .get(1)
                .cloned()
                .unwrap_or_else(|| Value::String(MISSING.to_owned()));
            context.insert(key, value, threshold);
        }
        self
    }

    /// Insert a context entry through a shared reference.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        let threshold = current_config().context_size;
        self.inner
            .context
            .lock()
            .insert(key.into(), value.into(), threshold);
    }

    /// Set `cause` as the wrapped error, keeping everything else.
    #[must_use]
    pub fn wrap<E>(self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.wrap_shared(Arc::new(cause))
    }

    /// Set an already shared cause.
    #[must_use]
    pub fn wrap_shared(mut self, cause: SharedError) -> Self {
        self.inner.cause = Some(cause);
        self.inner.inline_cause = false;
        self
    }

    /// Set `cause` and replace the message with a rendered template.
    #[must_use]
    pub fn wrapf<E>(mut self, cause: E, template: &str, args: &[Arg]) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.inner.message = format::render(template, args);
        self.wrap(cause)
    }

    /// Replace the message with a rendered template.
    #[must_use]
    pub fn msgf(mut self, template: &str, args: &[Arg]) -> Self {
        self.inner.message = format::render(template, args);
        self
    }

    /// Replace the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.inner.message = message.into();
        self
    }

    /// Capture a stack unless one is already present.
    #[must_use]
    pub fn with_stack(mut self) -> Self {
        if self.inner.stack.is_none() {
            self.inner.stack = Some(Stack::capture());
        }
        self
    }

    /// Set the numeric code.
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.inner.code = code;
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.inner.category = category.into();
        self
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Set the template the message was produced from.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.inner.template = template.into();
        self
    }

    /// Mark the error as eligible for retry.
    #[must_use]
    pub fn with_retryable(self) -> Self {
        self.with(RETRYABLE_KEY, true)
    }

    /// Mark the error as a timeout.
    #[must_use]
    pub fn with_timeout(self) -> Self {
        self.with(TIMEOUT_KEY, true)
    }

    /// Set the occurrence counter.
    #[must_use]
    pub fn with_count(self, count: u64) -> Self {
        self.inner.count.store(count, Ordering::Relaxed);
        self
    }

    /// Bump the occurrence counter, returning the new value.
    pub fn increment(&self) -> u64 {
        self.inner.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Identity shared by clones and used for matching unnamed errors.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Own message, without the cause.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Name, empty if unset.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Category, empty if unset.
    pub fn category(&self) -> &str {
        &self.inner.category
    }

    /// Template, empty if unset.
    pub fn template(&self) -> &str {
        &self.inner.template
    }

    /// Numeric code, 0 if unset.
    pub fn code(&self) -> i32 {
        self.inner.code
    }

    /// Occurrence counter.
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// The wrapped error, if any.
    pub fn cause(&self) -> Option<&SharedError> {
        self.inner.cause.as_ref()
    }

    /// Own context as a plain map.
    pub fn context(&self) -> HashMap<String, Value> {
        self.inner.context.lock().to_map()
    }

    /// One context value.
    pub fn context_value(&self, key: &str) -> Option<Value> {
        self.inner.context.lock().get(key).cloned()
    }

    /// Whether the own context holds `key`.
    pub fn has_context_key(&self, key: &str) -> bool {
        self.inner.context.lock().contains_key(key)
    }

    /// Whether the context has outgrown its inline slots.
    pub fn context_promoted(&self) -> bool {
        self.inner.context.lock().is_promoted()
    }

    /// Rendered stack frames, empty when none was captured.
    pub fn stack(&self) -> Vec<String> {
        self.inner.stack.as_ref().map(Stack::render).unwrap_or_default()
    }

    /// Whether a stack was captured.
    pub fn has_stack(&self) -> bool {
        self.inner.stack.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Whether this error itself is flagged retryable.
    pub fn is_retryable(&self) -> bool {
        self.flag(RETRYABLE_KEY)
    }

    /// Whether this error itself is flagged as a timeout.
    pub fn is_timeout(&self) -> bool {
        self.flag(TIMEOUT_KEY)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.inner.context.lock().get(key), Some(Value::Bool(true)))
    }

    /// No message, name, template or cause.
    pub fn is_empty(&self) -> bool {
        self.inner.message.is_empty()
            && self.inner.name.is_empty()
            && self.inner.template.is_empty()
            && self.inner.cause.is_none()
    }

    /// Context holds only null values, here or anywhere down the chain.
    pub fn is_null(&self) -> bool {
        if self.inner.context.lock().all_null() {
            return true;
        }
        match &self.inner.cause {
            Some(cause) => crate::chain::is_null(Some(cause.as_ref() as &(dyn StdError + 'static))),
            None => false,
        }
    }

    /// Copy of this error without its cause, keeping the identity.
    pub(crate) fn detached(&self) -> Self {
        let mut layer = self.duplicate(self.inner.id);
        layer.inner.cause = None;
        layer.inner.inline_cause = false;
        layer
    }

    /// Named, and nothing else that would show up in JSON.
    fn is_bare_name(&self) -> bool {
        !self.inner.name.is_empty()
            && self.inner.message.is_empty()
            && self.inner.code == 0
            && self.inner.cause.is_none()
            && self.inner.context.lock().is_empty()
    }

    pub(crate) fn own_segment(&self) -> &str {
        if !self.inner.message.is_empty() {
            &self.inner.message
        } else if !self.inner.name.is_empty() {
            &self.inner.name
        } else {
            &self.inner.template
        }
    }

    pub(crate) fn sorted_context(&self) -> BTreeMap<String, Value> {
        self.inner
            .context
            .lock()
            .iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect()
    }

    /// Multi-line rendering with code, context, cause and stack.
    pub fn format_verbose(&self) -> String {
        use std::fmt::Write as _;

        let mut out = format!("Error: {self}");
        if self.inner.code != 0 {
            let _ = write!(out, "\nCode: {}", self.inner.code);
        }
        let context = self.sorted_context();
        if !context.is_empty() {
            out.push_str("\nContext:");
            for (key, value) in &context {
                let _ = write!(out, "\n\t{key}: {}", display_value(value));
            }
        }
        if let Some(cause) = &self.inner.cause {
            let _ = write!(out, "\nCaused by: {cause}");
        }
        let frames = self.stack();
        if !frames.is_empty() {
            out.push_str("\nStack:");
            for (i, frame) in frames.iter().enumerate() {
                let _ = write!(out, "\n\t{}. {frame}", i + 1);
            }
        }
        out
    }
}

/// Put `cause` underneath `wrapper`.
pub fn wrap<E>(cause: E, wrapper: Error) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    wrapper.wrap(cause)
}

/// Wrap `cause` under a message rendered from `template`.
pub fn wrapf<E>(cause: E, template: &str, args: &[Arg]) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    Error::wrap_with(cause, template, args)
}

/// Verbose rendering for any error; `<nil>` for none.
pub fn format_error(err: Option<&(dyn StdError + 'static)>) -> String {
    match err {
        None => "<nil>".to_owned(),
        Some(err) => match err.downcast_ref::<Error>() {
            Some(custom) => custom.format_verbose(),
            None => format!("Error: {err}"),
        },
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Trait impls
// ============================================================================

impl Clone for Error {
    /// Same logical error: the clone keeps the identity.
    fn clone(&self) -> Self {
        self.duplicate(self.inner.id)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let own = self.own_segment();
        let cause = match &self.inner.cause {
            Some(cause) if !self.inner.inline_cause => cause.to_string(),
            _ => return f.write_str(own),
        };
        match (own.is_empty(), cause.is_empty()) {
            (false, false) => write!(f, "{own}: {cause}"),
            (true, _) => f.write_str(&cause),
            (false, true) => f.write_str(own),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("id", &self.inner.id)
            .field("message", &self.inner.message);
        if !self.inner.name.is_empty() {
            s.field("name", &self.inner.name);
        }
        if !self.inner.category.is_empty() {
            s.field("category", &self.inner.category);
        }
        if self.inner.code != 0 {
            s.field("code", &self.inner.code);
        }
        let context = self.sorted_context();
        if !context.is_empty() {
            s.field("context", &context);
        }
        if let Some(cause) = &self.inner.cause {
            s.field("cause", &cause.to_string());
        }
        s.finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let context = self.sorted_context();
        let stack = self.stack();

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("message", &self.inner.message)?;
        if !context.is_empty() {
            map.serialize_entry("context", &context)?;
        }
        if let Some(cause) = &self.inner.cause {
            map.serialize_entry("cause", &CauseRepr(cause.as_ref()))?;
        }
        if self.inner.code != 0 {
            map.serialize_entry("code", &self.inner.code)?;
        }
        if !stack.is_empty() {
            map.serialize_entry("stack", &stack)?;
        }
        map.end()
    }
}

/// JSON shape of a cause: `{"name"}` for a bare named error, the full
/// object for other custom errors, `{"message"}` for anything else.
pub(crate) struct CauseRepr<'a>(pub(crate) &'a (dyn StdError + Send + Sync + 'static));

impl Serialize for CauseRepr<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Some(err) = self.0.downcast_ref::<Error>() {
            if err.is_bare_name() {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("name", err.name())?;
                return map.end();
            }
            return err.serialize(serializer);
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("message", &self.0.to_string())?;
        map.end()
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let timeout = err.kind() == std::io::ErrorKind::TimedOut;
        let wrapped = Self::from_source(err);
        if timeout { wrapped.with_timeout() } else { wrapped }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::from_source(err)
    }
}

impl From<Cancelled> for Error {
    fn from(err: Cancelled) -> Self {
        Self::from_source(err)
    }
}

impl From<DeadlineExceeded> for Error {
    fn from(err: DeadlineExceeded) -> Self {
        Self::from_source(err).with_timeout()
    }
}

impl From<Box<dyn StdError + Send + Sync>> for Error {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        match err.downcast::<Self>() {
            Ok(custom) => *custom,
            Err(other) => Self::blank().wrap_shared(Arc::from(other)),
        }
    }
}
