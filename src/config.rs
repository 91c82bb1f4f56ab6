//! Public, transport-agnostic RPC configuration.
//!
//! This type contains no transport-specific concepts. Transport layers are
//! constructed separately and handed to [`RpcSessionBuilder`](crate::RpcSessionBuilder).

use std::time::Duration;

use crate::{KeyStrategy, Result, RpcError};

/// Session configuration.
///
/// # Example
///
/// ```
/// use rtremote_rpc::{KeyStrategy, RpcConfig};
/// use std::time::Duration;
///
/// let config = RpcConfig::new("display-node")
///     .with_request_timeout(Duration::from_secs(5))
///     .with_key_strategy(KeyStrategy::Counter);
/// assert_eq!(config.node_id, "display-node");
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Identifier for this node, used for logging and as the prefix of
    /// [`KeyStrategy::Counter`] keys.
    pub node_id: String,

    /// Default time to wait for a reply when the caller gives no timeout.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// How often the reaper sweeps the correlation table for expired requests.
    ///
    /// A request is timed out at most one interval after its deadline.
    /// Must be non-zero.
    ///
    /// Default: 250 ms
    pub reaper_interval: Duration,

    /// How correlation keys are generated.
    ///
    /// Default: [`KeyStrategy::RandomToken`]
    pub key_strategy: KeyStrategy,

    /// Number of fresh keys to try when a generated key collides with a
    /// pending one. Must be at least 1.
    ///
    /// Default: 4
    pub max_key_attempts: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            node_id: "node".to_string(),
            request_timeout: Duration::from_secs(30),
            reaper_interval: Duration::from_millis(250),
            key_strategy: KeyStrategy::default(),
            max_key_attempts: 4,
        }
    }
}

impl RpcConfig {
    /// Default configuration for the node `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reaper sweep interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the correlation key strategy.
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// Set how many keys to try on collision.
    pub fn with_max_key_attempts(mut self, attempts: u32) -> Self {
        self.max_key_attempts = attempts;
        self
    }

    /// Check the values a session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArgument`] for an empty `node_id`, a zero
    /// `reaper_interval` or a zero `max_key_attempts`.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.node_id.is_empty() {
            return Err(RpcError::invalid_argument("node_id must not be empty"));
        }
        if self.reaper_interval.is_zero() {
            return Err(RpcError::invalid_argument("reaper_interval must be non-zero"));
        }
        if self.max_key_attempts == 0 {
            return Err(RpcError::invalid_argument("max_key_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.node_id, "node");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reaper_interval, Duration::from_millis(250));
        assert_eq!(config.key_strategy, KeyStrategy::RandomToken);
        assert_eq!(config.max_key_attempts, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        // ---
        let cases = [
            RpcConfig::new(""),
            RpcConfig::new("n").with_reaper_interval(Duration::ZERO),
            RpcConfig::new("n").with_max_key_attempts(0),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(RpcError::InvalidArgument(_))),
                "{config:?}"
            );
        }
    }
}
