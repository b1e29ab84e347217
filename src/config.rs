//! Pipeline configuration: stream sizing, per-action defaults, flush cadence.

use crate::error::{BulkError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Hard cap on bucket size, enforced over any command or action setting.
pub const MAX_BUCKET_SIZE: usize = 10_000;

/// Default bucket size when neither the command nor the action sets one.
pub const DEFAULT_BUCKET_SIZE: usize = 100;

/// Per-action configuration registered with the pipeline.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    /// Action name, also the suffix of its bucket stream (`bulk-<action>`)
    pub name: String,
    /// Default bucket size for commands that do not override it
    pub default_bucket_size: usize,
}

impl ActionConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            default_bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }

    pub fn with_bucket_size(mut self, size: usize) -> Self {
        self.default_bucket_size = size;
        self
    }
}

/// Configuration for the bulk pipeline
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Partition count used when the pipeline creates its streams
    pub partitions: usize,
    /// Page size requested from the scroll API
    pub scroll_batch_size: usize,
    /// Keep-alive requested for scroll cursors
    pub scroll_keep_alive: Duration,
    /// Flush cadence of the counter stage (its batch time threshold)
    pub counter_flush_interval: Duration,
    /// Retention applied to persisted statuses
    pub status_ttl: Option<Duration>,
    /// Registered actions, keyed by action name
    pub actions: HashMap<String, ActionConfig>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            scroll_batch_size: 100,
            scroll_keep_alive: Duration::from_secs(60),
            counter_flush_interval: Duration::from_millis(500),
            status_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
            actions: HashMap::new(),
        }
    }
}

impl BulkConfig {
    /// Register an action, returning the updated config (builder style)
    pub fn with_action(mut self, action: ActionConfig) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    /// Look up a registered action
    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.actions.get(name)
    }

    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(partitions) = std::env::var("BULKFLOW_PARTITIONS") {
            config.partitions = partitions.parse().map_err(|e| {
                BulkError::config(format!("Invalid BULKFLOW_PARTITIONS: {e}"))
            })?;
        }

        if let Ok(size) = std::env::var("BULKFLOW_SCROLL_BATCH_SIZE") {
            config.scroll_batch_size = size.parse().map_err(|e| {
                BulkError::config(format!("Invalid BULKFLOW_SCROLL_BATCH_SIZE: {e}"))
            })?;
        }

        if let Ok(millis) = std::env::var("BULKFLOW_COUNTER_FLUSH_MS") {
            let millis: u64 = millis.parse().map_err(|e| {
                BulkError::config(format!("Invalid BULKFLOW_COUNTER_FLUSH_MS: {e}"))
            })?;
            config.counter_flush_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Resolve the effective bucket size for a command against this config.
    ///
    /// Precedence: command override, then action default, capped by
    /// [`MAX_BUCKET_SIZE`] in all cases.
    pub fn effective_bucket_size(&self, action: &str, command_override: Option<usize>) -> usize {
        let base = command_override
            .or_else(|| self.action(action).map(|a| a.default_bucket_size))
            .unwrap_or(DEFAULT_BUCKET_SIZE);
        base.clamp(1, MAX_BUCKET_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_size_precedence() {
        let config = BulkConfig::default()
            .with_action(ActionConfig::new("setProperties").with_bucket_size(500));

        // command override wins
        assert_eq!(
            config.effective_bucket_size("setProperties", Some(250)),
            250
        );
        // action default next
        assert_eq!(config.effective_bucket_size("setProperties", None), 500);
        // unknown action falls back to the global default
        assert_eq!(
            config.effective_bucket_size("unknown", None),
            DEFAULT_BUCKET_SIZE
        );
    }

    #[test]
    fn test_bucket_size_hard_cap() {
        let config = BulkConfig::default();
        assert_eq!(
            config.effective_bucket_size("any", Some(MAX_BUCKET_SIZE * 10)),
            MAX_BUCKET_SIZE
        );
        // zero is nonsense; clamp to at least one id per bucket
        assert_eq!(config.effective_bucket_size("any", Some(0)), 1);
    }
}
