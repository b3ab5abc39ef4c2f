//! Profile-builder types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seed state for a stream-fold run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    /// Profile being rebuilt.
    pub profile_id: String,
    /// Traits known before the run.
    #[serde(default)]
    pub traits: serde_json::Map<String, serde_json::Value>,
    /// Version of the stored profile, if any.
    #[serde(default)]
    pub version: u64,
}

/// A built profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Profile {
    /// Profile id.
    pub profile_id: String,
    /// Destination the profile is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    /// Target table, when a function chose one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Merged traits.
    pub traits: serde_json::Map<String, serde_json::Value>,
    /// Monotonic version.
    pub version: u64,
    /// Build time.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Start a profile from seed state. The version is bumped once.
    #[must_use]
    pub fn from_seed(seed: &UserState, destination_id: Option<String>) -> Self {
        Self {
            profile_id: seed.profile_id.clone(),
            destination_id,
            table_name: None,
            traits: seed.traits.clone(),
            version: seed.version + 1,
            updated_at: Utc::now(),
        }
    }

    /// Merge `traits` over the current ones, last writer wins per key.
    pub fn merge_traits(&mut self, traits: &serde_json::Map<String, serde_json::Value>) {
        for (k, v) in traits {
            self.traits.insert(k.clone(), v.clone());
        }
    }
}
