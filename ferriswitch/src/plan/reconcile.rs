//! Reconciler: what has to change to get from the device state to the
//! desired state.
//!
//! Without an [`ObservedState`] the reconciler assumes nothing about the
//! device. In replace mode it then resets every port and clears everything
//! outside the protected set and the desired set, and recreates the desired
//! entities. With an observation it works on set differences instead.

use std::collections::BTreeSet;

use log::{debug, warn};

use super::model::{
    DesiredState, LacpMode, MAX_VLAN_ID, Mode, ObservedState, ObservedVlan, PortRole, Protected,
    ReplaceSafety, sanitize_vlan_name,
};
use crate::dialect::Dialect;
use crate::error::PlanError;

/// A VLAN (or run of VLANs) to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanDeletion {
    Single(u16),
    Range { start: u16, end: u16 },
}

impl VlanDeletion {
    pub fn contains(&self, vlan: u16) -> bool {
        match *self {
            Self::Single(id) => id == vlan,
            Self::Range { start, end } => (start..=end).contains(&vlan),
        }
    }
}

/// A VLAN to create, or to rename when it already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanUpsert {
    pub id: u16,
    pub name: String,
    pub exists: bool,
}

/// One port membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortAssignment {
    Untagged { port: u16, vlan: u16 },
    Tagged { port: u16, vlan: u16 },
    Access { port: u16, vlan: u16 },
    Trunk { port: u16, vlans: Vec<u16>, native: u16 },
}

impl PortAssignment {
    pub fn port(&self) -> u16 {
        match *self {
            Self::Untagged { port, .. }
            | Self::Tagged { port, .. }
            | Self::Access { port, .. }
            | Self::Trunk { port, .. } => port,
        }
    }
}

/// A LAG teardown action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagRemoval {
    /// Take one member port out of its LAG.
    Leave { lag: u16, port: u16 },
    /// Remove the port-channel itself.
    Delete { lag: u16 },
}

/// A port to add to a LAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagJoin {
    pub lag: u16,
    pub port: u16,
    pub mode: LacpMode,
}

/// The computed change set, grouped the way the builder emits it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub port_resets: Vec<u16>,
    pub lag_removals: Vec<LagRemoval>,
    pub vlan_deletions: Vec<VlanDeletion>,
    pub vlan_upserts: Vec<VlanUpsert>,
    pub port_assignments: Vec<PortAssignment>,
    pub lag_joins: Vec<LagJoin>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.port_resets.is_empty()
            && self.lag_removals.is_empty()
            && self.vlan_deletions.is_empty()
            && self.vlan_upserts.is_empty()
            && self.port_assignments.is_empty()
            && self.lag_joins.is_empty()
    }
}

/// Computes a [`Reconciliation`] for one device.
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    dialect: &'a Dialect,
    protected: Protected,
    safety: ReplaceSafety,
}

impl<'a> Reconciler<'a> {
    /// The dialect's default and reserved VLANs are always protected.
    pub fn new(dialect: &'a Dialect, protected: &Protected) -> Self {
        let mut protected = protected.clone();
        protected.vlans.insert(dialect.default_vlan);
        protected.vlans.extend(dialect.reserved_vlans.iter().copied());
        Self {
            dialect,
            protected,
            safety: ReplaceSafety::default(),
        }
    }

    pub fn with_safety(mut self, safety: ReplaceSafety) -> Self {
        self.safety = safety;
        self
    }

    pub fn protected(&self) -> &Protected {
        &self.protected
    }

    pub fn reconcile(
        &self,
        desired: &DesiredState,
        mode: Mode,
        observed: Option<&ObservedState>,
    ) -> Result<Reconciliation, PlanError> {
        desired.validate(self.dialect.max_lag_id)?;
        if let Some(&id) = desired.vlan_ids().intersection(&self.dialect.reserved_vlans).next() {
            return Err(PlanError::ReservedVlan { id });
        }

        let mut rec = Reconciliation::default();
        if mode == Mode::Replace {
            rec.vlan_deletions = self.vlan_deletions(desired, observed)?;
            rec.port_resets = self.port_resets(desired, observed, &rec.vlan_deletions);
            self.check_management_vlan(&rec, observed)?;
            rec.lag_removals = self.lag_removals(desired, observed);
        }

        rec.vlan_upserts = self.vlan_upserts(desired, observed);
        // Replace mode just cleared the ports, so every assignment is needed
        let observed_ports = if mode == Mode::Add { observed } else { None };
        rec.port_assignments = self.port_assignments(desired, observed_ports);
        rec.lag_joins = self.lag_joins(desired, observed);

        debug!(
            "reconciled {:?}: {} resets, {} lag removals, {} vlan deletions, {} vlan upserts, \
             {} assignments, {} lag joins",
            mode,
            rec.port_resets.len(),
            rec.lag_removals.len(),
            rec.vlan_deletions.len(),
            rec.vlan_upserts.len(),
            rec.port_assignments.len(),
            rec.lag_joins.len()
        );
        Ok(rec)
    }

    fn vlan_deletions(
        &self,
        desired: &DesiredState,
        observed: Option<&ObservedState>,
    ) -> Result<Vec<VlanDeletion>, PlanError> {
        let mut keep = desired.vlan_ids();
        keep.extend(self.protected.vlans.iter().copied());

        if let Some(observed) = observed {
            return Ok(observed
                .vlans
                .keys()
                .filter(|id| !keep.contains(id))
                .map(|&id| VlanDeletion::Single(id))
                .collect());
        }

        if self.dialect.commands.delete_vlan_range.is_empty() {
            return Err(PlanError::ObservationRequired {
                reason: format!(
                    "dialect '{}' has no VLAN range deletion, so unknown VLANs cannot be cleared",
                    self.dialect.name
                ),
            });
        }
        Ok(complement_ranges(&keep))
    }

    /// Deleting the management VLAN, or resetting a port that may carry
    /// it, needs the caller's confirmation.
    fn check_management_vlan(
        &self,
        rec: &Reconciliation,
        observed: Option<&ObservedState>,
    ) -> Result<(), PlanError> {
        let Some(vlan) = self.safety.management_vlan else {
            return Ok(());
        };

        let risk = if rec.vlan_deletions.iter().any(|d| d.contains(vlan)) {
            Some(PlanError::ManagementVlanAtRisk { vlan })
        } else {
            // Without a port list for the VLAN, any reset port may carry it
            let members = observed
                .and_then(|o| o.vlans.get(&vlan))
                .map(ObservedVlan::ports)
                .filter(|ports| !ports.is_empty());
            rec.port_resets
                .iter()
                .copied()
                .find(|port| members.as_ref().is_none_or(|m| m.contains(port)))
                .map(|port| PlanError::ManagementPortAtRisk { vlan, port })
        };

        match risk {
            None => Ok(()),
            Some(_) if self.safety.confirm_management_risk => {
                warn!("replace may cut management VLAN {}; caller confirmed", vlan);
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    fn port_resets(
        &self,
        desired: &DesiredState,
        observed: Option<&ObservedState>,
        deletions: &[VlanDeletion],
    ) -> Vec<u16> {
        let mut ports = desired.member_ports();

        match observed {
            // Ports still carrying a doomed VLAN must be moved off it first
            Some(observed) => {
                for (&id, vlan) in &observed.vlans {
                    if deletions.iter().any(|d| d.contains(id)) {
                        ports.extend(vlan.ports());
                    }
                }
            }
            None => {
                if self.dialect.max_port == 0 {
                    warn!(
                        "dialect '{}' has no port count; blind replace resets desired ports only",
                        self.dialect.name
                    );
                }
                ports.extend(1..=self.dialect.max_port);
            }
        }

        ports
            .into_iter()
            .filter(|port| !self.protected.ports.contains(port))
            .collect()
    }

    fn lag_removals(&self, desired: &DesiredState, observed: Option<&ObservedState>) -> Vec<LagRemoval> {
        let mut removals = Vec::new();

        let Some(observed) = observed else {
            let wanted: BTreeSet<u16> = desired.lags.iter().map(|l| l.id).collect();
            for lag in 1..=self.dialect.max_lag_id {
                if !wanted.contains(&lag) && !self.protected.lags.contains(&lag) {
                    removals.push(LagRemoval::Delete { lag });
                }
            }
            return removals;
        };

        for (&id, lag) in &observed.lags {
            if self.protected.lags.contains(&id) {
                continue;
            }
            let wanted = desired.lags.iter().find(|l| l.id == id);
            let stays: BTreeSet<u16> = wanted.map(|l| l.members.clone()).unwrap_or_default();
            for &port in lag.members.difference(&stays) {
                if !self.protected.ports.contains(&port) {
                    removals.push(LagRemoval::Leave { lag: id, port });
                }
            }
            if wanted.is_none() {
                removals.push(LagRemoval::Delete { lag: id });
            }
        }
        removals
    }

    fn vlan_upserts(&self, desired: &DesiredState, observed: Option<&ObservedState>) -> Vec<VlanUpsert> {
        let mut upserts = Vec::new();
        for vlan in &desired.vlans {
            if self.protected.vlans.contains(&vlan.id) {
                debug!("VLAN {} is protected; leaving it as is", vlan.id);
                continue;
            }
            let name = sanitize_vlan_name(&vlan.name, self.dialect.vlan_name_max);
            match observed.and_then(|o| o.vlans.get(&vlan.id)) {
                Some(existing) if existing.name == name => {}
                Some(_) => upserts.push(VlanUpsert {
                    id: vlan.id,
                    name,
                    exists: true,
                }),
                None => upserts.push(VlanUpsert {
                    id: vlan.id,
                    name,
                    exists: false,
                }),
            }
        }
        upserts
    }

    fn port_assignments(
        &self,
        desired: &DesiredState,
        observed: Option<&ObservedState>,
    ) -> Vec<PortAssignment> {
        let present = |vlan: u16, port: u16, tagged: bool| {
            observed
                .and_then(|o| o.vlans.get(&vlan))
                .is_some_and(|v| {
                    if tagged {
                        v.tagged.contains(&port)
                    } else {
                        v.untagged.contains(&port)
                    }
                })
        };
        let allowed = |port: u16| !self.protected.ports.contains(&port);

        let mut assignments = Vec::new();
        for vlan in &desired.vlans {
            for &port in vlan.untagged.iter().filter(|&&p| allowed(p)) {
                if !present(vlan.id, port, false) {
                    assignments.push(PortAssignment::Untagged { port, vlan: vlan.id });
                }
            }
            for &port in vlan.tagged.iter().filter(|&&p| allowed(p)) {
                if !present(vlan.id, port, true) {
                    assignments.push(PortAssignment::Tagged { port, vlan: vlan.id });
                }
            }
        }

        for config in desired.ports.iter().filter(|c| allowed(c.port)) {
            let port = config.port;
            match &config.role {
                PortRole::Access { vlan } => {
                    if !present(*vlan, port, false) {
                        assignments.push(PortAssignment::Access { port, vlan: *vlan });
                    }
                }
                PortRole::Trunk { vlans, native } => {
                    let complete = vlans.iter().all(|&v| present(v, port, true));
                    if !complete || native.is_some() {
                        assignments.push(PortAssignment::Trunk {
                            port,
                            vlans: vlans.iter().copied().collect(),
                            native: native.unwrap_or(self.dialect.default_vlan),
                        });
                    }
                }
            }
        }
        assignments
    }

    fn lag_joins(&self, desired: &DesiredState, observed: Option<&ObservedState>) -> Vec<LagJoin> {
        let mut joins = Vec::new();
        for lag in &desired.lags {
            if self.protected.lags.contains(&lag.id) {
                debug!("LAG {} is protected; leaving it as is", lag.id);
                continue;
            }
            let existing = observed.and_then(|o| o.lags.get(&lag.id));
            for &port in &lag.members {
                if self.protected.ports.contains(&port) {
                    continue;
                }
                let joined = existing.is_some_and(|e| {
                    e.members.contains(&port) && e.mode.is_none_or(|m| m == lag.mode)
                });
                if !joined {
                    joins.push(LagJoin {
                        lag: lag.id,
                        port,
                        mode: lag.mode,
                    });
                }
            }
        }
        joins
    }
}

/// Contiguous runs of VLAN ids in `1..=4094` that are not in `keep`.
fn complement_ranges(keep: &BTreeSet<u16>) -> Vec<VlanDeletion> {
    let mut ranges = Vec::new();
    let mut start: Option<u16> = None;

    for id in 1..=MAX_VLAN_ID {
        match (keep.contains(&id), start) {
            (false, None) => start = Some(id),
            (true, Some(s)) => {
                ranges.push(run(s, id - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push(run(s, MAX_VLAN_ID));
    }
    ranges
}

fn run(start: u16, end: u16) -> VlanDeletion {
    if start == end {
        VlanDeletion::Single(start)
    } else {
        VlanDeletion::Range { start, end }
    }
}
