//! Command script builder: turns a [`Reconciliation`] into an ordered plan.
//!
//! The builder owns ordering and gating. Command text always comes from
//! the dialect's templates.

use std::fmt;
use std::time::Duration;

use log::debug;

use super::reconcile::{LagRemoval, PortAssignment, Reconciliation, VlanDeletion};
use crate::channel::PromptKind;
use crate::dialect::{Dialect, Template, Vars, render};
use crate::error::PlanError;

/// Which part of the plan a step belongs to, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    EnterConfig,
    PortReset,
    LagRemoval,
    VlanDeletion,
    VlanCreate,
    PortAssignment,
    LagMembership,
    ExitConfig,
    Save,
}

/// The entity a step acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Vlan(u16),
    VlanRange { start: u16, end: u16 },
    Port(u16),
    Lag(u16),
}

impl EntityRef {
    pub fn touches_vlan(&self, vlan: u16) -> bool {
        match *self {
            Self::Vlan(id) => id == vlan,
            Self::VlanRange { start, end } => (start..=end).contains(&vlan),
            Self::Port(_) | Self::Lag(_) => false,
        }
    }

    pub fn touches_lag(&self, lag: u16) -> bool {
        matches!(*self, Self::Lag(id) if id == lag)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vlan(id) => write!(f, "vlan {}", id),
            Self::VlanRange { start, end } => write!(f, "vlans {}-{}", start, end),
            Self::Port(port) => write!(f, "port {}", port),
            Self::Lag(id) => write!(f, "lag {}", id),
        }
    }
}

/// One command of a plan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    /// Text sent to the device.
    pub command: String,

    /// Prompt that must follow a successful send.
    pub expect: PromptKind,

    /// Overrides the session's prompt timeout.
    pub timeout: Option<Duration>,

    /// Benign messages; the step then counts as unchanged.
    pub tolerate: Vec<String>,

    /// When non-empty, one of these must appear for the step to succeed.
    pub require_any: Vec<String>,

    /// A rejection is recorded but does not abort the plan.
    pub best_effort: bool,

    /// Success changes device configuration.
    pub mutating: bool,

    pub target: Option<EntityRef>,

    pub section: Section,
}

/// The ordered command list for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<CommandStep>,
}

impl Plan {
    pub fn new(steps: Vec<CommandStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[CommandStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandStep> {
        self.steps.iter()
    }

    /// Command texts in send order.
    pub fn commands(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.command.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a CommandStep;
    type IntoIter = std::slice::Iter<'a, CommandStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// How the lines of one template turn into steps.
struct StepKind<'t> {
    section: Section,
    target: Option<EntityRef>,
    mutating: bool,
    best_effort: bool,
    tolerate: &'t [String],
}

/// Builds a [`Plan`] from a [`Reconciliation`] using one dialect's templates.
#[derive(Debug, Clone)]
pub struct ScriptBuilder<'a> {
    dialect: &'a Dialect,
    save: bool,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(dialect: &'a Dialect) -> Self {
        Self {
            dialect,
            save: true,
        }
    }

    /// Leave the running config unsaved.
    pub fn without_save(mut self) -> Self {
        self.save = false;
        self
    }

    /// Emit the plan. An empty reconciliation yields an empty plan.
    pub fn build(&self, rec: &Reconciliation) -> Result<Plan, PlanError> {
        if rec.is_empty() {
            debug!("nothing to change; empty plan");
            return Ok(Plan::default());
        }

        let commands = &self.dialect.commands;
        let exists = self.dialect.tolerate_exists.as_slice();
        let absent = self.dialect.tolerate_absent.as_slice();
        let default_vlan = self.dialect.default_vlan;
        let mut steps = Vec::new();

        self.emit(
            &mut steps,
            self.require("enter_config", &commands.enter_config)?,
            &Vars::new(),
            StepKind {
                section: Section::EnterConfig,
                target: None,
                mutating: false,
                best_effort: false,
                tolerate: &[],
            },
        )?;

        // Resets come before any deletion of a VLAN the port may carry
        for &port in &rec.port_resets {
            self.emit(
                &mut steps,
                self.require("port_reset", &commands.port_reset)?,
                &Vars::new().set("port", port).set("default_vlan", default_vlan),
                StepKind {
                    section: Section::PortReset,
                    target: Some(EntityRef::Port(port)),
                    mutating: true,
                    best_effort: true,
                    tolerate: absent,
                },
            )?;
        }

        for removal in &rec.lag_removals {
            let (template, vars, target) = match *removal {
                LagRemoval::Leave { lag, port } => (
                    self.require("lag_leave", &commands.lag_leave)?,
                    Vars::new().set("port", port).set("lag", lag),
                    EntityRef::Lag(lag),
                ),
                LagRemoval::Delete { lag } => (
                    self.require("lag_delete", &commands.lag_delete)?,
                    Vars::new().set("lag", lag),
                    EntityRef::Lag(lag),
                ),
            };
            self.emit(
                &mut steps,
                template,
                &vars,
                StepKind {
                    section: Section::LagRemoval,
                    target: Some(target),
                    mutating: true,
                    best_effort: true,
                    tolerate: absent,
                },
            )?;
        }

        for deletion in &rec.vlan_deletions {
            let (template, vars, target) = match *deletion {
                VlanDeletion::Single(vlan) if !commands.delete_vlan.is_empty() => (
                    &commands.delete_vlan,
                    Vars::new().set("vlan", vlan),
                    EntityRef::Vlan(vlan),
                ),
                VlanDeletion::Single(vlan) => (
                    self.require("delete_vlan_range", &commands.delete_vlan_range)?,
                    Vars::new().set("start", vlan).set("end", vlan),
                    EntityRef::Vlan(vlan),
                ),
                VlanDeletion::Range { start, end } => (
                    self.require("delete_vlan_range", &commands.delete_vlan_range)?,
                    Vars::new().set("start", start).set("end", end),
                    EntityRef::VlanRange { start, end },
                ),
            };
            self.emit(
                &mut steps,
                template,
                &vars,
                StepKind {
                    section: Section::VlanDeletion,
                    target: Some(target),
                    mutating: true,
                    best_effort: true,
                    tolerate: absent,
                },
            )?;
        }

        for upsert in &rec.vlan_upserts {
            let vars = Vars::new().set("vlan", upsert.id).set("name", &upsert.name);
            let target = Some(EntityRef::Vlan(upsert.id));
            // On a rename the create line only enters the existing VLAN
            self.emit(
                &mut steps,
                self.require("create_vlan", &commands.create_vlan)?,
                &vars,
                StepKind {
                    section: Section::VlanCreate,
                    target,
                    mutating: !upsert.exists,
                    best_effort: false,
                    tolerate: exists,
                },
            )?;
            self.emit(
                &mut steps,
                &commands.name_vlan,
                &vars,
                StepKind {
                    section: Section::VlanCreate,
                    target,
                    mutating: true,
                    best_effort: false,
                    tolerate: exists,
                },
            )?;
        }

        for assignment in &rec.port_assignments {
            let (template, vars) = match assignment {
                PortAssignment::Untagged { port, vlan } => (
                    self.require("port_untagged", &commands.port_untagged)?,
                    Vars::new().set("port", port).set("vlan", vlan),
                ),
                PortAssignment::Tagged { port, vlan } => (
                    self.require("port_tagged", &commands.port_tagged)?,
                    Vars::new().set("port", port).set("vlan", vlan),
                ),
                PortAssignment::Access { port, vlan } => (
                    self.require("port_access", &commands.port_access)?,
                    Vars::new().set("port", port).set("vlan", vlan),
                ),
                PortAssignment::Trunk {
                    port,
                    vlans,
                    native,
                } => (
                    self.require("port_trunk", &commands.port_trunk)?,
                    Vars::new()
                        .set("port", port)
                        .set("vlans", join_ids(vlans))
                        .set("native", native),
                ),
            };
            self.emit(
                &mut steps,
                template,
                &vars,
                StepKind {
                    section: Section::PortAssignment,
                    target: Some(EntityRef::Port(assignment.port())),
                    mutating: true,
                    best_effort: false,
                    tolerate: exists,
                },
            )?;
        }

        for join in &rec.lag_joins {
            self.emit(
                &mut steps,
                self.require("lag_join", &commands.lag_join)?,
                &Vars::new()
                    .set("port", join.port)
                    .set("lag", join.lag)
                    .set("mode", join.mode),
                StepKind {
                    section: Section::LagMembership,
                    target: Some(EntityRef::Lag(join.lag)),
                    mutating: true,
                    best_effort: false,
                    tolerate: exists,
                },
            )?;
        }

        self.emit(
            &mut steps,
            self.require("exit_config", &commands.exit_config)?,
            &Vars::new(),
            StepKind {
                section: Section::ExitConfig,
                target: None,
                mutating: false,
                best_effort: false,
                tolerate: &[],
            },
        )?;

        if self.save {
            if commands.save.is_empty() {
                debug!("dialect '{}' has no save command", self.dialect.name);
            }
            self.emit(
                &mut steps,
                &commands.save,
                &Vars::new(),
                StepKind {
                    section: Section::Save,
                    target: None,
                    mutating: false,
                    best_effort: false,
                    tolerate: &[],
                },
            )?;
        }

        debug!("built plan of {} steps for {}", steps.len(), self.dialect.name);
        Ok(Plan::new(steps))
    }

    fn require<'t>(&self, operation: &str, template: &'t Template) -> Result<&'t Template, PlanError> {
        if template.is_empty() {
            return Err(PlanError::MissingTemplate {
                dialect: self.dialect.name.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(template)
    }

    fn emit(
        &self,
        steps: &mut Vec<CommandStep>,
        template: &Template,
        vars: &Vars,
        kind: StepKind<'_>,
    ) -> Result<(), PlanError> {
        for line in template {
            let mut tolerate = line.tolerate.clone();
            tolerate.extend(kind.tolerate.iter().cloned());
            steps.push(CommandStep {
                command: render(&line.text, vars)?,
                expect: line.expect,
                timeout: line.timeout(),
                tolerate,
                require_any: line.require_any.clone(),
                best_effort: kind.best_effort,
                mutating: line.mutating.unwrap_or(kind.mutating),
                target: kind.target,
                section: kind.section,
            });
        }
        Ok(())
    }
}

fn join_ids(ids: &[u16]) -> String {
    ids.iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::vendors::tplink_sg;
    use crate::plan::model::{DesiredState, Lag, LacpMode, Mode, ObservedState, Protected, Vlan};
    use crate::plan::reconcile::Reconciler;

    fn build(
        dialect: &Dialect,
        desired: &DesiredState,
        mode: Mode,
        protected: &Protected,
        observed: Option<&ObservedState>,
    ) -> Plan {
        let rec = Reconciler::new(dialect, protected)
            .reconcile(desired, mode, observed)
            .unwrap();
        ScriptBuilder::new(dialect).build(&rec).unwrap()
    }

    #[test]
    fn test_tplink_add_plan() {
        let dialect = tplink_sg::dialect().unwrap();
        let desired = DesiredState::new().with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]));
        let plan = build(&dialect, &desired, Mode::Add, &Protected::new(), None);

        assert_eq!(
            plan.commands(),
            vec![
                "configure",
                "vlan 10",
                "name Mgmt",
                "exit",
                "interface gigabitEthernet 1/0/1",
                "switchport general allowed vlan 10 untagged",
                "switchport pvid 10",
                "exit",
                "end",
                "copy running-config startup-config",
            ]
        );
        let save = plan.steps().last().unwrap();
        assert_eq!(save.expect, PromptKind::Privileged);
        assert!(!save.mutating);
        assert!(save.require_any.contains(&"Succeed".to_string()));
        assert!(!plan.steps()[3].mutating);
        assert!(plan.steps()[1].tolerate.iter().any(|t| t == "already exist"));
    }

    #[test]
    fn test_replace_never_targets_protected() {
        let dialect = tplink_sg::dialect().unwrap();
        let protected = Protected::new().vlan(99).vlan(100).lag(2);
        let desired = DesiredState::new()
            .with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]))
            .with_vlan(Vlan::new(99, "Reserved").with_tagged([8]))
            .with_lag(Lag::new(2, [5, 6], LacpMode::Active))
            .with_lag(Lag::new(3, [7, 9], LacpMode::On));

        let observed = ObservedState::new()
            .with_vlan(99, "Reserved")
            .with_vlan(100, "Voice")
            .with_vlan(200, "Old")
            .with_lag(2, [5, 6]);

        for observed in [None, Some(&observed)] {
            let plan = build(&dialect, &desired, Mode::Replace, &protected, observed);
            for step in &plan {
                let Some(target) = step.target else { continue };
                for vlan in protected.vlans.iter().copied().chain([dialect.default_vlan]) {
                    assert!(!target.touches_vlan(vlan), "{:?} touches VLAN {}", step, vlan);
                }
                assert!(!target.touches_lag(2), "{:?} touches LAG 2", step);
            }
        }
    }

    #[test]
    fn test_port_resets_precede_vlan_deletions() {
        let dialect = tplink_sg::dialect().unwrap();
        let mut observed = ObservedState::new().with_vlan(30, "Legacy");
        observed.vlans.get_mut(&30).unwrap().untagged.insert(4);
        let desired = DesiredState::new().with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]));

        let plan = build(&dialect, &desired, Mode::Replace, &Protected::new(), Some(&observed));
        let reset = plan
            .iter()
            .position(|s| s.target == Some(EntityRef::Port(4)) && s.section == Section::PortReset)
            .unwrap();
        let delete = plan
            .iter()
            .position(|s| s.target == Some(EntityRef::Vlan(30)))
            .unwrap();
        assert!(reset < delete);
        assert_eq!(plan.steps()[delete].command, "no vlan 30");
        assert!(plan.steps()[delete].best_effort);

        let sections: Vec<Section> = plan.iter().map(|s| s.section).collect();
        let mut sorted = sections.clone();
        sorted.sort();
        assert_eq!(sections, sorted);
    }

    #[test]
    fn test_add_mode_emits_no_deletions() {
        let dialect = tplink_sg::dialect().unwrap();
        let desired = DesiredState::new()
            .with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]))
            .with_lag(Lag::new(1, [9, 10], LacpMode::Passive));
        let plan = build(&dialect, &desired, Mode::Add, &Protected::new(), None);

        assert!(plan.iter().all(|s| !matches!(
            s.section,
            Section::PortReset | Section::LagRemoval | Section::VlanDeletion
        )));
        assert!(plan.commands().contains(&"channel-group 1 mode passive"));
    }

    #[test]
    fn test_blind_replace_uses_ranges() {
        let dialect = tplink_sg::dialect().unwrap();
        let desired = DesiredState::new().with_vlan(Vlan::new(10, "Mgmt"));
        let plan = build(&dialect, &desired, Mode::Replace, &Protected::new(), None);
        let commands = plan.commands();
        assert!(commands.contains(&"no vlan 2-9"));
        assert!(commands.contains(&"no vlan 11-4094"));
        assert!(commands.contains(&"no interface port-channel 1"));
    }

    #[test]
    fn test_missing_template() {
        let mut dialect = tplink_sg::dialect().unwrap();
        dialect.commands.port_tagged.clear();
        let desired = DesiredState::new().with_vlan(Vlan::new(10, "Mgmt").with_tagged([8]));
        let rec = Reconciler::new(&dialect, &Protected::new())
            .reconcile(&desired, Mode::Add, None)
            .unwrap();
        assert_eq!(
            ScriptBuilder::new(&dialect).build(&rec),
            Err(PlanError::MissingTemplate {
                dialect: "tplink_sg".into(),
                operation: "port_tagged".into(),
            })
        );
    }

    #[test]
    fn test_empty_reconciliation() {
        let dialect = tplink_sg::dialect().unwrap();
        let plan = ScriptBuilder::new(&dialect)
            .build(&Reconciliation::default())
            .unwrap();
        assert!(plan.is_empty());
    }
}
