//! Key/value context attached to an [`Error`](crate::Error).
//!
//! Small contexts stay inline in a [`SmallVec`]; once the configured slot
//! count is exceeded the entries move into a [`HashMap`]. Insertion order is
//! kept while inline and not promised after promotion.

use std::collections::HashMap;

use serde_json::Value;
use smallvec::SmallVec;

/// Inline capacity of the small representation.
pub(crate) const INLINE_SLOTS: usize = 4;

/// Value stored for a key that was given without a value.
pub const MISSING: &str = "(MISSING)";

/// Reserved key holding the retryable flag.
pub const RETRYABLE_KEY: &str = "[error_retryable]";

/// Reserved key holding the timeout flag.
pub const TIMEOUT_KEY: &str = "[error_timeout]";

#[derive(Debug, Clone)]
pub(crate) enum ContextStore {
    Inline(SmallVec<[(String, Value); INLINE_SLOTS]>),
    Map(HashMap<String, Value>),
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::Inline(SmallVec::new())
    }
}

impl ContextStore {
    /// Insert or replace `key`, promoting to a map once `threshold` distinct
    /// keys would be exceeded.
    pub(crate) fn insert(&mut self, key: String, value: Value, threshold: usize) {
        match self {
            Self::Inline(slots) => {
                if let Some(slot) = slots.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                    return;
                }
                if slots.len() < threshold {
                    slots.push((key, value));
                    return;
                }
                let mut map: HashMap<String, Value> = HashMap::with_capacity(slots.len() + 1);
                map.extend(slots.drain(..));
                map.insert(key, value);
                *self = Self::Map(map);
            }
            Self::Map(map) => {
                map.insert(key, value);
            }
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Inline(slots) => slots.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Self::Map(map) => map.get(key),
        }
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Inline(slots) => slots.len(),
            Self::Map(map) => map.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_promoted(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    pub(crate) fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
        match self {
            Self::Inline(slots) => Box::new(slots.iter().map(|(k, v)| (k.as_str(), v))),
            Self::Map(map) => Box::new(map.iter().map(|(k, v)| (k.as_str(), v))),
        }
    }

    pub(crate) fn to_map(&self) -> HashMap<String, Value> {
        self.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect()
    }

    /// True when there is at least one entry and every value is null.
    pub(crate) fn all_null(&self) -> bool {
        !self.is_empty() && self.iter().all(|(_, v)| v.is_null())
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Self::Inline(slots) => slots.clear(),
            Self::Map(_) => *self = Self::default(),
        }
    }
}

/// Render a context key the way variadic key/value lists expect.
pub(crate) fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
