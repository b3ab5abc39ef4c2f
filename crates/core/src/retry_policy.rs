//! Retry policy attached to function errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Back-off schedule for a retryable error.
///
/// Attempts are 1-based: attempt `1` is the first retry. An explicit
/// [`delays`](Self::delays) list wins over the exponential schedule; its last
/// entry repeats when attempts outnumber it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of retries.
    pub max: u32,
    /// Explicit per-attempt delays in seconds.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delays: Vec<u64>,
    /// First delay of the exponential schedule, in seconds.
    pub initial_delay_secs: u64,
    /// Exponential multiplier.
    pub multiplier: f64,
    /// Upper bound for a single delay, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 3,
            delays: Vec::new(),
            initial_delay_secs: 60,
            multiplier: 2.0,
            max_delay_secs: 3600,
        }
    }
}

impl RetryPolicy {
    /// Default schedule with a custom attempt limit.
    #[must_use]
    pub fn with_max(max: u32) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    /// Fixed per-attempt delays; `max` is the length of the list.
    #[must_use]
    pub fn fixed(delays: Vec<Duration>) -> Self {
        Self {
            max: delays.len() as u32,
            delays: delays.iter().map(Duration::as_secs).collect(),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::with_max(0)
    }

    /// Delay before retry number `attempt`, or `None` once retries are
    /// exhausted. `attempt == 0` is treated as the first retry.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let attempt = attempt.max(1);
        if attempt > self.max {
            return None;
        }

        if let Some(last) = self.delays.last() {
            let idx = (attempt - 1) as usize;
            let secs = self.delays.get(idx).unwrap_or(last);
            return Some(Duration::from_secs(*secs));
        }

        let exp = self.multiplier.max(1.0).powi((attempt - 1) as i32);
        let secs = (self.initial_delay_secs as f64 * exp).min(self.max_delay_secs as f64);
        Some(Duration::from_secs(secs as u64))
    }

    /// Whether another retry is allowed after `attempt` failures.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        self.delay_for(attempt).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exponential_schedule() {
        let p = RetryPolicy::with_max(4);
        assert_eq!(p.delay_for(1), Some(Duration::from_secs(60)));
        assert_eq!(p.delay_for(2), Some(Duration::from_secs(120)));
        assert_eq!(p.delay_for(3), Some(Duration::from_secs(240)));
        assert_eq!(p.delay_for(4), Some(Duration::from_secs(480)));
        assert_eq!(p.delay_for(5), None);
    }

    #[test]
    fn schedule_is_capped() {
        let p = RetryPolicy {
            max: 20,
            max_delay_secs: 300,
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay_for(10), Some(Duration::from_secs(300)));
    }

    #[test]
    fn explicit_delays_repeat_last() {
        let p = RetryPolicy {
            max: 4,
            delays: vec![5, 30],
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay_for(1), Some(Duration::from_secs(5)));
        assert_eq!(p.delay_for(2), Some(Duration::from_secs(30)));
        assert_eq!(p.delay_for(4), Some(Duration::from_secs(30)));
        assert_eq!(p.delay_for(5), None);
    }

    #[test]
    fn max_three_exhausts_on_fourth_attempt() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max": 3}"#).unwrap();
        assert!(p.delay_for(1).is_some());
        assert!(p.allows(3));
        assert!(!p.allows(4));
    }

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryPolicy::none().delay_for(1), None);
    }

    #[test]
    fn fixed_uses_list_length() {
        let p = RetryPolicy::fixed(vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(p.max, 2);
        assert_eq!(p.delay_for(2), Some(Duration::from_secs(2)));
    }
}
