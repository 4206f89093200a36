use ioc_core::HutchPolicy;
use serde::{Deserialize, Serialize};

use crate::plan::{PlannedAction, ReconfigureKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allowed,
    Denied { reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decide whether `user` may apply `action` under `policy`.
///
/// Users outside the auth list may still start or stop IOCs marked special,
/// and may restart one onto a permitted special variant. Moves always need
/// full authorization.
pub fn authorize(policy: &HutchPolicy, user: &str, action: &PlannedAction) -> GateDecision {
    if policy.check_auth(user) {
        return GateDecision::Allowed;
    }

    let special = match action {
        PlannedAction::Start { proc } => policy.check_special(&proc.name, None),
        PlannedAction::Stop { name, .. } => policy.check_special(name, None),
        PlannedAction::Reconfigure {
            proc,
            kind: ReconfigureKind::PathOnly,
            ..
        } => policy.check_special(&proc.name, Some(&proc.path)),
        PlannedAction::Reconfigure {
            kind: ReconfigureKind::Move,
            ..
        } => false,
    };
    if special {
        return GateDecision::Allowed;
    }

    GateDecision::Denied {
        reason: format!(
            "{user} is not authorized to {} {} in {}",
            action.kind(),
            action.name(),
            policy.hutch()
        ),
    }
}
