//! Execution configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-query execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Default number of storage cursors kept open ahead of the consumer
    /// by operators that support lookahead (1 disables lookahead)
    pub lookahead_quantum: usize,
    /// Report cursor protocol violations as errors
    pub lifecycle_checks: bool,
    /// Log every row yielded by every cursor at trace level
    pub log_execution: bool,
    /// Abort the query once it has run this long
    pub query_timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            lookahead_quantum: 1,
            lifecycle_checks: true,
            log_execution: false,
            query_timeout: None,
        }
    }
}

impl ExecutionConfig {
    #[must_use]
    pub fn with_lookahead_quantum(mut self, quantum: usize) -> Self {
        self.lookahead_quantum = quantum;
        self
    }

    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_log_execution(mut self, enabled: bool) -> Self {
        self.log_execution = enabled;
        self
    }

    #[must_use]
    pub fn with_lifecycle_checks(mut self, enabled: bool) -> Self {
        self.lifecycle_checks = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutionConfig::default();
        assert_eq!(config.lookahead_quantum, 1);
        assert!(config.lifecycle_checks);
        assert!(!config.log_execution);
        assert!(config.query_timeout.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = ExecutionConfig::default()
            .with_lookahead_quantum(4)
            .with_query_timeout(Duration::from_secs(2))
            .with_log_execution(true);
        assert_eq!(config.lookahead_quantum, 4);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(2)));
        assert!(config.log_execution);
    }
}
