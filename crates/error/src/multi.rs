//! Thread-safe aggregation of many errors.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::SharedError;
use crate::error::Error;

/// Custom renderer for a [`MultiError`].
pub type Formatter = Arc<dyn Fn(&[SharedError]) -> String + Send + Sync>;

struct State {
    errors: Vec<SharedError>,
    rng: fastrand::Rng,
}

/// Collects independent failures behind a lock.
///
/// `None` inputs and errors whose text duplicates one already stored are
/// skipped. With sampling enabled each new error is kept with the configured
/// probability; once the limit is reached further errors are dropped.
///
/// ```
/// use faultline_error::{Error, MultiError};
///
/// let errs = MultiError::new().with_limit(2);
/// errs.add(Error::new("first"));
/// errs.add(Error::new("second"));
/// errs.add(Error::new("third"));
/// assert_eq!(errs.count(), 2);
/// assert_eq!(errs.to_string(), "errors(2): first; second");
/// ```
pub struct MultiError {
    state: Mutex<State>,
    limit: usize,
    sampling: Option<u32>,
    formatter: Option<Formatter>,
}

impl Default for MultiError {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiError {
    /// Empty aggregate with no limit, sampling or formatter.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                errors: Vec::new(),
                rng: fastrand::Rng::new(),
            }),
            limit: 0,
            sampling: None,
            formatter: None,
        }
    }

    /// Keep at most `limit` errors; 0 means unlimited.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Keep each new error with probability `rate_percent / 100`.
    #[must_use]
    pub fn with_sampling(mut self, rate_percent: u32) -> Self {
        self.sampling = Some(rate_percent.min(100));
        self
    }

    /// Random source used for sampling decisions.
    #[must_use]
    pub fn with_rng(self, rng: fastrand::Rng) -> Self {
        self.state.lock().rng = rng;
        self
    }

    /// Replace the default rendering.
    #[must_use]
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&[SharedError]) -> String + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Configured limit, 0 when unlimited.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Add an error, returning whether it was kept.
    pub fn add<E>(&self, err: E) -> bool
    where
        E: StdError + Send + Sync + 'static,
    {
        self.add_shared(Arc::new(err))
    }

    /// Add an already shared error, returning whether it was kept.
    pub fn add_shared(&self, err: SharedError) -> bool {
        let mut state = self.state.lock();
        self.admit(&mut state, err)
    }

    /// Add several errors under one lock; `None` entries are skipped.
    pub fn add_all<I>(&self, errs: I) -> usize
    where
        I: IntoIterator<Item = Option<SharedError>>,
    {
        let mut state = self.state.lock();
        errs.into_iter()
            .flatten()
            .filter(|err| self.admit(&mut state, Arc::clone(err)))
            .count()
    }

    fn admit(&self, state: &mut State, err: SharedError) -> bool {
        let text = err.to_string();
        if state.errors.iter().any(|e| e.to_string() == text) {
            return false;
        }
        if let Some(rate) = self.sampling
            && rate < 100
            && state.rng.u32(..100) >= rate
        {
            return false;
        }
        if self.limit > 0 && state.errors.len() >= self.limit {
            return false;
        }
        state.errors.push(err);
        true
    }

    /// Number of stored errors.
    pub fn count(&self) -> usize {
        self.state.lock().errors.len()
    }

    /// Whether anything was stored.
    pub fn has(&self) -> bool {
        self.count() > 0
    }

    /// Earliest stored error.
    pub fn first(&self) -> Option<SharedError> {
        self.state.lock().errors.first().cloned()
    }

    /// Latest stored error.
    pub fn last(&self) -> Option<SharedError> {
        self.state.lock().errors.last().cloned()
    }

    /// Snapshot of stored errors in insertion order.
    pub fn errors(&self) -> Vec<SharedError> {
        self.state.lock().errors.clone()
    }

    /// New aggregate with only the errors matching `predicate`, keeping limit
    /// and formatter.
    pub fn filter(&self, mut predicate: impl FnMut(&SharedError) -> bool) -> Self {
        let mut kept = self.errors();
        kept.retain(|err| predicate(err));
        Self {
            state: Mutex::new(State {
                errors: kept,
                rng: fastrand::Rng::new(),
            }),
            limit: self.limit,
            sampling: self.sampling,
            formatter: self.formatter.clone(),
        }
    }

    /// `None` when empty, the sole error when there is one, otherwise the
    /// aggregate itself.
    pub fn single(self) -> Option<SharedError> {
        match self.count() {
            0 => None,
            1 => self.state.into_inner().errors.pop(),
            _ => Some(Arc::new(self)),
        }
    }

    /// Add every error held by `other`.
    pub fn merge(&self, other: &Self) {
        let incoming = other.errors();
        self.add_all(incoming.into_iter().map(Some));
    }

    /// Empty, or every stored error is null.
    pub fn is_null(&self) -> bool {
        self.state
            .lock()
            .errors
            .iter()
            .all(|err| crate::chain::is_null(Some(err.as_ref() as &(dyn StdError + 'static))))
    }
}

impl Clone for MultiError {
    fn clone(&self) -> Self {
        let mut state = self.state.lock();
        let rng = state.rng.fork();
        Self {
            state: Mutex::new(State {
                errors: state.errors.clone(),
                rng,
            }),
            limit: self.limit,
            sampling: self.sampling,
            formatter: self.formatter.clone(),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        if let Some(formatter) = &self.formatter {
            return f.write_str(&formatter(&state.errors));
        }
        match state.errors.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{only}"),
            errors => {
                write!(f, "errors({}): ", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let texts: Vec<String> = state.errors.iter().map(ToString::to_string).collect();
        f.debug_struct("MultiError")
            .field("errors", &texts)
            .field("limit", &self.limit)
            .field("sampling", &self.sampling)
            .finish()
    }
}

impl StdError for MultiError {}

impl Serialize for MultiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let errors = self.errors();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("count", &errors.len())?;
        if self.limit > 0 {
            map.serialize_entry("limit", &self.limit)?;
        }
        map.serialize_entry("errors", &Entries(&errors))?;
        map.end()
    }
}

struct Entries<'a>(&'a [SharedError]);

impl Serialize for Entries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for err in self.0 {
            seq.serialize_element(&Entry(err.as_ref()))?;
        }
        seq.end()
    }
}

struct Entry<'a>(&'a (dyn StdError + Send + Sync + 'static));

impl Serialize for Entry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self.0.downcast_ref::<Error>() {
            Some(custom) => map.serialize_entry("error", custom)?,
            None => map.serialize_entry("error", &self.0.to_string())?,
        }
        map.end()
    }
}
