//! Sandbox limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource limits applied to every sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Ceiling for the linear memory of each guest, in bytes.
    pub memory_bytes: usize,
    /// Deadline for a per-event invocation.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Deadline for a stream-fold invocation.
    #[serde(with = "humantime_serde")]
    pub stream_timeout: Duration,
    /// Largest JSON payload accepted from a guest, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024,
            timeout: Duration::from_secs(10),
            stream_timeout: Duration::from_secs(120),
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations_are_human_readable() {
        let limits: SandboxLimits =
            serde_json::from_str(r#"{"timeout": "2s", "memory_bytes": 1048576}"#).unwrap();
        assert_eq!(limits.timeout, Duration::from_secs(2));
        assert_eq!(limits.memory_bytes, 1_048_576);
        assert_eq!(limits.stream_timeout, Duration::from_secs(120));
    }
}
