//! Planning: desired state in, ordered command steps out.
//!
//! No I/O happens here. A [`Plan`] is fully determined before a session
//! opens; the session only decides whether each step succeeded.

mod builder;
mod model;
mod reconcile;

pub use builder::{CommandStep, EntityRef, Plan, ScriptBuilder, Section};
pub use model::{
    DesiredState, LacpMode, Lag, MAX_VLAN_ID, Mode, ObservedLag, ObservedState, ObservedVlan,
    PortConfig, PortRole, Protected, ReplaceSafety, Vlan, sanitize_vlan_name,
};
pub use reconcile::{
    LagJoin, LagRemoval, PortAssignment, Reconciler, Reconciliation, VlanDeletion, VlanUpsert,
};

use crate::dialect::Dialect;
use crate::error::PlanError;

/// Everything the planner needs besides the dialect.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub desired: DesiredState,
    pub mode: Mode,
    pub protected: Protected,
    pub safety: ReplaceSafety,
    pub observed: Option<ObservedState>,
    /// Leave the running config unsaved.
    pub skip_save: bool,
}

impl PlanRequest {
    pub fn new(desired: DesiredState, mode: Mode) -> Self {
        Self {
            desired,
            mode,
            ..Default::default()
        }
    }

    pub fn protected(mut self, protected: Protected) -> Self {
        self.protected = protected;
        self
    }

    pub fn safety(mut self, safety: ReplaceSafety) -> Self {
        self.safety = safety;
        self
    }

    pub fn observed(mut self, observed: ObservedState) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn skip_save(mut self) -> Self {
        self.skip_save = true;
        self
    }
}

/// Reconcile and build in one go.
pub fn build_plan(dialect: &Dialect, request: &PlanRequest) -> Result<Plan, PlanError> {
    let rec = Reconciler::new(dialect, &request.protected)
        .with_safety(request.safety)
        .reconcile(&request.desired, request.mode, request.observed.as_ref())?;

    let builder = ScriptBuilder::new(dialect);
    let builder = if request.skip_save {
        builder.without_save()
    } else {
        builder
    };
    builder.build(&rec)
}
