//! Function metadata.

use serde::{Deserialize, Serialize};

use crate::retry_policy::RetryPolicy;

/// What a function declares about itself, via its definition or its `meta`
/// export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMeta {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Retry policy applied to unclassified errors thrown by the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meta_export_shape() {
        let meta: FunctionMeta =
            serde_json::from_str(r#"{"retryPolicy": {"max": 2, "delays": [1, 5]}}"#).unwrap();
        let policy = meta.retry_policy.unwrap();
        assert_eq!(policy.max, 2);
        assert_eq!(policy.delays, vec![1, 5]);
    }

    #[test]
    fn empty_object_is_default() {
        let meta: FunctionMeta = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, FunctionMeta::default());
    }
}
