//! Registry configuration.

use serde::{Deserialize, Serialize};

/// Per-registry settings, swappable at runtime through
/// [`Registry::configure`](crate::Registry::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Skip counting, thresholds and metric snapshots.
    pub disable_metrics: bool,
}

impl Config {
    /// Config with metrics turned off.
    #[must_use]
    pub fn without_metrics() -> Self {
        Self {
            disable_metrics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.disable_metrics);
    }
}
