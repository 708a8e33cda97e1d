//! Parse `show` output into an [`ObservedState`].
//!
//! Output formats drift between firmware releases, so parsing is lenient:
//! lines that do not match are skipped, never reported as errors.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use regex::Regex;

use super::Dialect;
use crate::plan::{LacpMode, ObservedLag, ObservedState, ObservedVlan};

/// VLAN ids, names and member ports from `show vlan` output.
///
/// Member ports land in [`ObservedVlan::members`]: the table lists them
/// without saying which are tagged.
pub fn parse_vlans(dialect: &Dialect, output: &str) -> BTreeMap<u16, ObservedVlan> {
    let mut vlans = BTreeMap::new();
    let Some(pattern) = dialect.observation.vlan.as_ref() else {
        return vlans;
    };
    let port_pattern = dialect.observation.ports.as_ref();

    let mut current: Option<u16> = None;
    for line in output.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(caps) = pattern.captures(line) {
            current = None;
            let Some(id) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
                continue;
            };
            let mut vlan = ObservedVlan {
                name: caps.get(2).map_or("", |m| m.as_str().trim()).to_string(),
                ..Default::default()
            };
            if let (Some(port_pattern), Some(list)) = (port_pattern, caps.get(3)) {
                vlan.members = parse_port_list(port_pattern, list.as_str());
            }
            trace!("observed vlan {} '{}' on {:?}", id, vlan.name, vlan.members);
            vlans.insert(id, vlan);
            current = Some(id);
            continue;
        }

        // Long port lists wrap onto indented lines
        match (current.and_then(|id| vlans.get_mut(&id)), port_pattern) {
            (Some(vlan), Some(port_pattern))
                if line.starts_with([' ', '\t']) && port_pattern.is_match(line) =>
            {
                vlan.members.extend(parse_port_list(port_pattern, line));
            }
            _ => current = None,
        }
    }
    vlans
}

/// Port numbers in a list such as `Gi1/0/1-4,Gi1/0/7`.
pub fn parse_port_list(pattern: &Regex, list: &str) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for caps in pattern.captures_iter(list) {
        let Some(first) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
            continue;
        };
        let last = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .unwrap_or(first);
        ports.extend(first..=last);
    }
    ports
}

/// LAG membership from the running config.
///
/// Tracks the current interface block and records `channel-group` lines
/// inside it. A `#`, `!` or `end` line closes the block.
pub fn parse_lags(dialect: &Dialect, running_config: &str) -> BTreeMap<u16, ObservedLag> {
    let mut lags: BTreeMap<u16, ObservedLag> = BTreeMap::new();
    let (Some(interface), Some(channel_group)) = (
        dialect.observation.interface.as_ref(),
        dialect.observation.channel_group.as_ref(),
    ) else {
        return lags;
    };

    let mut current_port: Option<u16> = None;
    for line in running_config.lines() {
        let trimmed = line.trim();

        if let Some(caps) = interface.captures(trimmed) {
            current_port = caps.get(1).and_then(|m| m.as_str().parse().ok());
            continue;
        }

        if let Some(port) = current_port {
            if let Some(caps) = channel_group.captures(trimmed) {
                let Some(id) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) else {
                    continue;
                };
                let mode = caps.get(2).and_then(|m| m.as_str().parse::<LacpMode>().ok());
                let lag = lags.entry(id).or_default();
                lag.members.insert(port);
                if mode.is_some() {
                    lag.mode = mode;
                }
                continue;
            }
        }

        if trimmed.starts_with('#') || trimmed.starts_with('!') || trimmed == "end" {
            current_port = None;
        }
    }
    lags
}

/// Combine show command outputs into one observation.
pub fn observed_state(
    dialect: &Dialect,
    vlan_output: &str,
    running_config: Option<&str>,
) -> ObservedState {
    ObservedState {
        vlans: parse_vlans(dialect, vlan_output),
        lags: running_config
            .map(|config| parse_lags(dialect, config))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::dialect::vendors::{cisco_ios, tplink_sg};

    const SHOW_VLAN: &str = "\
VLAN  Name                 Status    Ports
----- -------------------- --------- ----------------------------------------
1     System-VLAN          active    Gi1/0/3-10
10    Mgmt                 active    Gi1/0/1
20    Clients              active    Gi1/0/2
30    Guest Wifi           active    Gi1/0/4-5,Gi1/0/7,
                                     Gi1/0/9
40    Spare                active
SG3210#";

    const RUNNING_CONFIG: &str = "\
#
interface gigabitEthernet 1/0/9
  switchport general allowed vlan 1 untagged
  channel-group 1 mode active
#
interface gigabitEthernet 1/0/10
  channel-group 1 mode active
#
interface gigabitEthernet 1/0/7
  description uplink
#
  channel-group 4 mode on
end";

    #[test]
    fn test_parse_tplink_vlans() {
        let dialect = tplink_sg::dialect().unwrap();
        let vlans = parse_vlans(&dialect, SHOW_VLAN);
        assert_eq!(vlans.keys().copied().collect::<Vec<_>>(), vec![1, 10, 20, 30, 40]);
        assert_eq!(vlans[&10].name, "Mgmt");
        assert_eq!(vlans[&30].name, "Guest Wifi");

        assert_eq!(vlans[&1].members, (3..=10).collect::<BTreeSet<_>>());
        assert_eq!(vlans[&20].members, BTreeSet::from([2]));
        assert_eq!(vlans[&30].members, BTreeSet::from([4, 5, 7, 9]));
        assert!(vlans[&40].members.is_empty());
        assert!(vlans[&10].untagged.is_empty());
    }

    #[test]
    fn test_parse_cisco_vlans() {
        let dialect = cisco_ios::dialect().unwrap();
        let output = "\
VLAN Name                             Status    Ports\r
---- -------------------------------- --------- -------------------------------\r
1    default                          active    Fa0/3, Fa0/4, Fa0/5, Fa0/6,\r
                                                Fa0/7\r
10   Management                       active    Fa0/2\r
1002 fddi-default                     act/unsup \r
\r
Switch#";
        let vlans = parse_vlans(&dialect, output);
        assert_eq!(vlans.keys().copied().collect::<Vec<_>>(), vec![1, 10, 1002]);
        assert_eq!(vlans[&1].members, (3..=7).collect::<BTreeSet<_>>());
        assert_eq!(vlans[&10].members, BTreeSet::from([2]));
        assert_eq!(vlans[&1002].name, "fddi-default");
    }

    #[test]
    fn test_parse_tplink_lags() {
        let dialect = tplink_sg::dialect().unwrap();
        let lags = parse_lags(&dialect, RUNNING_CONFIG);
        assert_eq!(lags.len(), 1);
        assert_eq!(lags[&1].members, BTreeSet::from([9, 10]));
        assert_eq!(lags[&1].mode, Some(LacpMode::Active));
    }

    #[test]
    fn test_no_observation_patterns() {
        let dialect = Dialect::new("bare");
        let observed = observed_state(&dialect, SHOW_VLAN, Some(RUNNING_CONFIG));
        assert!(observed.vlans.is_empty());
        assert!(observed.lags.is_empty());
    }
}
