//! TTL key-value store port.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortsError;

/// `ttl()` result for a key without expiry.
pub const TTL_NO_EXPIRY: i64 = -1;
/// `ttl()` result for a missing key.
pub const TTL_MISSING: i64 = -2;

/// Requested lifetime of a stored value.
///
/// Parses from a humantime string (`"10s"`, `"1h 30m"`), a number of seconds,
/// or `"inf"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Ttl {
    /// Never expires.
    Infinite,
    /// Expires after the duration.
    After(Duration),
}

impl Ttl {
    /// Parse a TTL given as JSON.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PortsError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| Self::After(Duration::from_secs_f64(secs)))
                .ok_or_else(|| PortsError::InvalidArgument(format!("ttl: {n}"))),
            serde_json::Value::String(s) => s.parse(),
            other => Err(PortsError::InvalidArgument(format!("ttl: {other}"))),
        }
    }

    /// Duration until expiry, `None` for [`Ttl::Infinite`].
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(d),
        }
    }
}

impl std::str::FromStr for Ttl {
    type Err = PortsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") {
            return Ok(Self::Infinite);
        }
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Self::After(Duration::from_secs(secs)));
        }
        humantime::parse_duration(s)
            .map(Self::After)
            .map_err(|e| PortsError::InvalidArgument(format!("ttl `{s}`: {e}")))
    }
}

impl TryFrom<serde_json::Value> for Ttl {
    type Error = PortsError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl From<Ttl> for serde_json::Value {
    fn from(ttl: Ttl) -> Self {
        match ttl {
            Ttl::Infinite => Self::String("inf".to_owned()),
            Ttl::After(d) => Self::from(d.as_secs()),
        }
    }
}

/// Remaining lifetime of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// The value never expires.
    NoExpiry,
    /// Time left before expiry.
    Remaining(Duration),
}

impl TtlStatus {
    /// Seconds left, or [`TTL_NO_EXPIRY`].
    #[must_use]
    pub fn as_seconds(self) -> i64 {
        match self {
            Self::NoExpiry => TTL_NO_EXPIRY,
            Self::Remaining(d) => d.as_secs() as i64,
        }
    }
}

/// Key-value store with per-key expiry.
///
/// Values are JSON. Individual operations are atomic per key; the engine adds
/// no locking of its own.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Value for `key`, or `None` if missing or expired.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PortsError>;

    /// Value and remaining lifetime for `key`.
    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, TtlStatus)>, PortsError>;

    /// Store `value`. `None` keeps it forever.
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Ttl>,
    ) -> Result<(), PortsError>;

    /// Remove `key`. Missing keys are not an error.
    async fn del(&self, key: &str) -> Result<(), PortsError>;

    /// Seconds to live, [`TTL_NO_EXPIRY`] or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> Result<i64, PortsError> {
        Ok(self
            .get_with_ttl(key)
            .await?
            .map_or(TTL_MISSING, |(_, status)| status.as_seconds()))
    }
}
