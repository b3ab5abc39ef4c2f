//! Replay scopes for retried events.

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::func::StageRole;

/// Which stages a replayed run executes.
///
/// Stages that already succeeded for the event are never re-executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "functionId", rename_all = "snake_case")]
pub enum ReplayScope {
    /// Every stage.
    #[default]
    All,
    /// The named stage and everything after it.
    From(String),
    /// Only the named stage.
    Only(String),
}

impl ReplayScope {
    /// Scope for replaying a failure of `function_id`.
    ///
    /// A transformation or UDF failure replays the failing stage and its
    /// successors; a destination failure replays the destination only. An
    /// unknown function replays everything.
    pub fn for_failure(chain: &Chain, function_id: &str) -> Self {
        let Some(position) = chain.position(function_id) else {
            return Self::All;
        };
        match chain.functions()[position].role {
            StageRole::Destination => Self::Only(function_id.to_owned()),
            StageRole::Transformation | StageRole::Udf => Self::From(function_id.to_owned()),
        }
    }

    /// One flag per stage of `chain`: whether it runs under this scope.
    ///
    /// A scope naming a stage the chain does not have selects every stage.
    pub fn mask(&self, chain: &Chain) -> Vec<bool> {
        let len = chain.functions().len();
        match self {
            Self::All => vec![true; len],
            Self::From(id) => match chain.position(id) {
                Some(start) => (0..len).map(|i| i >= start).collect(),
                None => vec![true; len],
            },
            Self::Only(id) => match chain.position(id) {
                Some(only) => (0..len).map(|i| i == only).collect(),
                None => vec![true; len],
            },
        }
    }
}
