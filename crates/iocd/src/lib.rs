pub mod executor;
pub mod gate;
pub mod plan;
pub mod reconcile;
pub mod report;

pub use executor::*;
pub use gate::*;
pub use plan::*;
pub use reconcile::*;
pub use report::*;

#[cfg(test)]
mod tests {
    use super::{
        authorize, plan, ActionOutcome, GateDecision, Orchestrator, PassReport, PlannedAction,
        ProcServOps,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_orchestrator_types() {
        let _ = TypeId::of::<Orchestrator<ProcServOps>>();
        let _ = TypeId::of::<PassReport>();
        let _ = TypeId::of::<PlannedAction>();
        let _ = TypeId::of::<ActionOutcome>();
        let _ = TypeId::of::<GateDecision>();
    }

    #[test]
    fn crate_root_reexports_pure_steps() {
        let _ = plan;
        let _ = authorize;
    }
}
