//! Consumer settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConsumerError;

/// Settings for [`PriorityConsumer`](crate::PriorityConsumer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Messages processed concurrently across all classes.
    pub pool_size: usize,
    /// How long one dequeue waits before re-checking for shutdown.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Coalescing window for per-key work.
    #[serde(with = "humantime_serde")]
    pub coalesce_window: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            poll_timeout: Duration::from_secs(1),
            coalesce_window: Duration::from_secs(30),
        }
    }
}

impl ConsumerConfig {
    /// Reject settings the consumer cannot run with.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.pool_size == 0 {
            return Err(ConsumerError::InvalidConfig("pool_size must be > 0".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "poll_timeout must be greater than zero".into(),
            ));
        }
        if self.coalesce_window.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "coalesce_window must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
