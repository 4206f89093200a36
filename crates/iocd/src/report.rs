use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlannedAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    Denied { reason: String },
    Failed { error: String },
}

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: PlannedAction,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    /// OS of the host acted on, when the host table knows it.
    pub host_os: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of one reconciliation pass over a hutch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub hutch: String,
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub actions: Vec<ActionReport>,
}

impl PassReport {
    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Applied))
    }

    pub fn denied(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Denied { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Failed { .. }))
    }

    /// Nothing was denied or failed.
    pub fn is_converged(&self) -> bool {
        self.denied() == 0 && self.failed() == 0
    }

    pub fn get(&self, name: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|report| report.action.name() == name)
    }

    fn count(&self, pred: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.actions
            .iter()
            .filter(|report| pred(&report.outcome))
            .count()
    }
}
