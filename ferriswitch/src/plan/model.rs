//! Desired and observed switch state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::PlanError;

/// Highest valid 802.1Q VLAN id.
pub const MAX_VLAN_ID: u16 = 4094;

/// Characters that upset line-mode CLIs or their scripting wrappers.
const NAME_FORBIDDEN: &[char] = &['\\', '"', '\'', '$', '[', ']', '{', '}'];

/// Reconciliation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Only create and assign; never delete.
    #[default]
    Add,
    /// Remove everything not desired (except protected entities), then add.
    Replace,
}

/// One VLAN of the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vlan {
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub tagged: BTreeSet<u16>,
    #[serde(default)]
    pub untagged: BTreeSet<u16>,
}

impl Vlan {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tagged: BTreeSet::new(),
            untagged: BTreeSet::new(),
        }
    }

    pub fn with_tagged(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.tagged.extend(ports);
        self
    }

    pub fn with_untagged(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.untagged.extend(ports);
        self
    }
}

/// How a port carries VLANs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    /// One untagged VLAN, which is also the PVID.
    Access { vlan: u16 },
    /// Tagged VLANs plus a native (PVID) VLAN; the dialect's default VLAN
    /// when unset.
    Trunk {
        vlans: BTreeSet<u16>,
        #[serde(default)]
        native: Option<u16>,
    },
}

/// Role assignment for one port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortConfig {
    pub port: u16,
    pub role: PortRole,
}

impl PortConfig {
    pub fn access(port: u16, vlan: u16) -> Self {
        Self {
            port,
            role: PortRole::Access { vlan },
        }
    }

    pub fn trunk(port: u16, vlans: impl IntoIterator<Item = u16>, native: Option<u16>) -> Self {
        Self {
            port,
            role: PortRole::Trunk {
                vlans: vlans.into_iter().collect(),
                native,
            },
        }
    }
}

/// LACP negotiation mode of a LAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LacpMode {
    #[default]
    Active,
    Passive,
    /// Static aggregation, no LACP.
    On,
}

impl LacpMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::On => "on",
        }
    }
}

impl fmt::Display for LacpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LacpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "passive" => Ok(Self::Passive),
            "on" => Ok(Self::On),
            other => Err(format!("unknown LACP mode '{}'", other)),
        }
    }
}

/// A link aggregation group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lag {
    pub id: u16,
    pub members: BTreeSet<u16>,
    #[serde(default)]
    pub mode: LacpMode,
}

impl Lag {
    pub fn new(id: u16, members: impl IntoIterator<Item = u16>, mode: LacpMode) -> Self {
        Self {
            id,
            members: members.into_iter().collect(),
            mode,
        }
    }
}

/// Declarative target configuration. Never mutated by the core.
///
/// # Example
///
/// ```rust
/// use ferriswitch::plan::DesiredState;
///
/// let desired: DesiredState = serde_json::from_str(r#"{
///     "vlans": [{"id": 10, "name": "Mgmt", "untagged": [1]}],
///     "ports": [{"port": 8, "role": {"trunk": {"vlans": [10, 20]}}}],
///     "lags": [{"id": 1, "members": [9, 10], "mode": "active"}]
/// }"#).unwrap();
/// assert!(desired.validate(8).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub vlans: Vec<Vlan>,
    pub ports: Vec<PortConfig>,
    pub lags: Vec<Lag>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vlan(mut self, vlan: Vlan) -> Self {
        self.vlans.push(vlan);
        self
    }

    pub fn with_port(mut self, port: PortConfig) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_lag(mut self, lag: Lag) -> Self {
        self.lags.push(lag);
        self
    }

    pub fn vlan_ids(&self) -> BTreeSet<u16> {
        self.vlans.iter().map(|v| v.id).collect()
    }

    /// Ports whose VLAN membership this state defines.
    pub fn member_ports(&self) -> BTreeSet<u16> {
        let mut ports: BTreeSet<u16> = self
            .vlans
            .iter()
            .flat_map(|v| v.tagged.iter().chain(v.untagged.iter()).copied())
            .collect();
        ports.extend(self.ports.iter().map(|p| p.port));
        ports
    }

    /// Reject input the device would refuse half-way through a session.
    pub fn validate(&self, max_lag_id: u16) -> Result<(), PlanError> {
        let mut seen = BTreeSet::new();
        for vlan in &self.vlans {
            check_vlan_id(vlan.id)?;
            if !seen.insert(vlan.id) {
                return Err(PlanError::DuplicateVlan { id: vlan.id });
            }
            if sanitize_vlan_name(&vlan.name, usize::MAX).is_empty() {
                return Err(PlanError::EmptyVlanName { id: vlan.id });
            }
            for &port in vlan.tagged.iter().chain(vlan.untagged.iter()) {
                check_port(port)?;
            }
        }

        // A port can have one untagged VLAN (its PVID) at most
        let mut untagged: BTreeMap<u16, u16> = BTreeMap::new();
        let access = self.ports.iter().filter_map(|p| match p.role {
            PortRole::Access { vlan } => Some((p.port, vlan)),
            PortRole::Trunk { .. } => None,
        });
        let members = self
            .vlans
            .iter()
            .flat_map(|v| v.untagged.iter().map(move |&port| (port, v.id)));
        for (port, vlan) in members.chain(access) {
            if let Some(&first) = untagged.get(&port) {
                if first != vlan {
                    return Err(PlanError::ConflictingUntagged {
                        port,
                        first,
                        second: vlan,
                    });
                }
            }
            untagged.insert(port, vlan);
        }

        for port in &self.ports {
            check_port(port.port)?;
            match &port.role {
                PortRole::Access { vlan } => check_vlan_id(*vlan)?,
                PortRole::Trunk { vlans, native } => {
                    for &vlan in vlans.iter().chain(native.iter()) {
                        check_vlan_id(vlan)?;
                    }
                }
            }
        }

        let mut lag_ids = BTreeSet::new();
        let mut lag_of: BTreeMap<u16, u16> = BTreeMap::new();
        for lag in &self.lags {
            if lag.id == 0 || lag.id > max_lag_id {
                return Err(PlanError::InvalidLagId {
                    id: lag.id,
                    max: max_lag_id,
                });
            }
            if !lag_ids.insert(lag.id) {
                return Err(PlanError::DuplicateLag { id: lag.id });
            }
            if lag.members.len() < 2 {
                return Err(PlanError::LagTooSmall { id: lag.id });
            }
            for &port in &lag.members {
                check_port(port)?;
                if let Some(first) = lag_of.insert(port, lag.id) {
                    return Err(PlanError::LagMemberConflict {
                        port,
                        first,
                        second: lag.id,
                    });
                }
            }
        }

        Ok(())
    }
}

fn check_vlan_id(id: u16) -> Result<(), PlanError> {
    if id == 0 || id > MAX_VLAN_ID {
        return Err(PlanError::InvalidVlanId { id });
    }
    Ok(())
}

fn check_port(port: u16) -> Result<(), PlanError> {
    if port == 0 {
        return Err(PlanError::InvalidPort { port });
    }
    Ok(())
}

/// Strip characters the CLI cannot take in a name and cut to `max` chars.
pub fn sanitize_vlan_name(name: &str, max: usize) -> String {
    name.trim()
        .chars()
        .filter(|c| !NAME_FORBIDDEN.contains(c))
        .take(max)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Entities that replace mode must never touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Protected {
    pub vlans: BTreeSet<u16>,
    pub lags: BTreeSet<u16>,
    pub ports: BTreeSet<u16>,
}

impl Protected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vlan(mut self, id: u16) -> Self {
        self.vlans.insert(id);
        self
    }

    pub fn lag(mut self, id: u16) -> Self {
        self.lags.insert(id);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ports.insert(port);
        self
    }
}

/// Guard for replace runs against a device managed in-band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReplaceSafety {
    /// VLAN carrying the management session, if the caller knows it.
    pub management_vlan: Option<u16>,

    /// Caller accepts that replace mode may delete the management VLAN or
    /// reset ports carrying it.
    pub confirm_management_risk: bool,
}

/// A VLAN as seen on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedVlan {
    pub name: String,
    pub tagged: BTreeSet<u16>,
    pub untagged: BTreeSet<u16>,
    /// Member ports listed without tagging information (e.g. the port
    /// column of `show vlan`).
    pub members: BTreeSet<u16>,
}

impl ObservedVlan {
    /// Whether `port` carries this VLAN, tagged or not.
    pub fn carries(&self, port: u16) -> bool {
        self.tagged.contains(&port) || self.untagged.contains(&port) || self.members.contains(&port)
    }

    /// Every port known to carry this VLAN.
    pub fn ports(&self) -> BTreeSet<u16> {
        self.tagged
            .iter()
            .chain(&self.untagged)
            .chain(&self.members)
            .copied()
            .collect()
    }
}

/// A LAG as seen on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedLag {
    pub members: BTreeSet<u16>,
    pub mode: Option<LacpMode>,
}

/// Best-effort snapshot of device state, parsed from `show` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub vlans: BTreeMap<u16, ObservedVlan>,
    pub lags: BTreeMap<u16, ObservedLag>,
}

impl ObservedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vlan(mut self, id: u16, name: impl Into<String>) -> Self {
        self.vlans.insert(
            id,
            ObservedVlan {
                name: name.into(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_lag(mut self, id: u16, members: impl IntoIterator<Item = u16>) -> Self {
        self.lags.insert(
            id,
            ObservedLag {
                members: members.into_iter().collect(),
                mode: None,
            },
        );
        self
    }

    /// VLAN ids that currently carry `port`.
    pub fn vlans_on_port(&self, port: u16) -> impl Iterator<Item = u16> + '_ {
        self.vlans
            .iter()
            .filter(move |(_, v)| v.carries(port))
            .map(|(&id, _)| id)
    }
}
