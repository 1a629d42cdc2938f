//! Process-wide configuration for error construction.
//!
//! The active [`Config`] lives in an [`ArcSwap`], so every constructor reads
//! it without taking a lock. [`configure`] validates and swaps in a new
//! snapshot; errors created before the swap keep whatever they captured.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Upper bound for [`Config::stack_depth`].
pub const MAX_STACK_DEPTH: usize = 1024;

/// Upper bound for [`Config::context_size`].
pub const MAX_CONTEXT_SIZE: usize = 64;

static CURRENT: LazyLock<ArcSwap<Config>> =
    LazyLock::new(|| ArcSwap::from_pointee(Config::default()));

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field is outside its accepted range.
    #[error("invalid {field}: {value} (expected {expected})")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// Value that was supplied.
        value: usize,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

/// Tunables for stack capture, context storage and pooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of frames kept per captured stack.
    pub stack_depth: usize,
    /// Number of context entries kept inline before promotion to a map.
    pub context_size: usize,
    /// Skip the error and stack pools entirely.
    pub disable_pooling: bool,
    /// Drop capture and runtime frames from rendered stacks.
    pub filter_internal: bool,
    /// Maximum number of idle instances retained per pool.
    pub pool_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_depth: 32,
            context_size: 4,
            disable_pooling: false,
            filter_internal: true,
            pool_capacity: 1024,
        }
    }
}

impl Config {
    /// Set the maximum captured stack depth.
    #[must_use]
    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }

    /// Set the inline context threshold.
    #[must_use]
    pub fn with_context_size(mut self, size: usize) -> Self {
        self.context_size = size;
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn with_pooling(mut self, enabled: bool) -> Self {
        self.disable_pooling = !enabled;
        self
    }

    /// Enable or disable internal frame filtering.
    #[must_use]
    pub fn with_filter_internal(mut self, filter: bool) -> Self {
        self.filter_internal = filter;
        self
    }

    /// Set how many idle instances each pool retains.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_depth == 0 || self.stack_depth > MAX_STACK_DEPTH {
            return Err(ConfigError::OutOfRange {
                field: "stack_depth",
                value: self.stack_depth,
                expected: "1..=1024",
            });
        }
        if self.context_size == 0 || self.context_size > MAX_CONTEXT_SIZE {
            return Err(ConfigError::OutOfRange {
                field: "context_size",
                value: self.context_size,
                expected: "1..=64",
            });
        }
        Ok(())
    }
}

/// Validate and install `config` as the process-wide configuration.
pub fn configure(config: Config) -> Result<(), ConfigError> {
    config.validate()?;
    CURRENT.store(Arc::new(config));
    Ok(())
}

/// Snapshot of the active configuration.
#[inline]
pub fn current_config() -> Arc<Config> {
    CURRENT.load_full()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stack_depth, 32);
        assert_eq!(config.context_size, 4);
        assert!(config.filter_internal);
    }

    #[rstest]
    #[case(Config::default().with_stack_depth(0), "stack_depth")]
    #[case(Config::default().with_stack_depth(MAX_STACK_DEPTH + 1), "stack_depth")]
    #[case(Config::default().with_context_size(0), "context_size")]
    #[case(Config::default().with_context_size(MAX_CONTEXT_SIZE + 1), "context_size")]
    fn rejects_out_of_range(#[case] config: Config, #[case] expected_field: &str) {
        match config.validate() {
            Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected_field),
            Ok(()) => panic!("expected {expected_field} to be rejected"),
        }
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: Config = serde_json::from_str(r#"{"stack_depth": 8}"#).unwrap();
        assert_eq!(config.stack_depth, 8);
        assert_eq!(config.context_size, 4);
    }
}
