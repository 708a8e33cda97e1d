//! TP-Link JetStream / SG managed switch dialect.
//!
//! # Prompt Examples
//!
//! ```text
//! User:                              # telnet login
//! SG3210>                            # user mode
//! SG3210#                            # privileged mode
//! SG3210(config)#                    # configuration mode
//! SG3210(config-if)#                 # config sub-mode (interface)
//! SG3210(config-vlan)#               # config sub-mode (vlan)
//! ```
//!
//! Ports are addressed as `gigabitEthernet 1/0/{port}`; membership is set
//! with the `switchport general allowed vlan` family. Saving prints
//! "Saving user config OK!" on most firmware and "Succeed" on some.

use crate::channel::{PromptKind, PromptPattern};
use crate::dialect::definition::{Dialect, Observation, compile_line_regex};
use crate::dialect::template::{CommandTemplates, TemplateLine};
use crate::error::DialectError;

use PromptKind::{Config, Privileged, User};

const INTERFACE: &str = "interface gigabitEthernet 1/0/{port}";

fn interface() -> TemplateLine {
    TemplateLine::navigation(INTERFACE, Config)
}

fn leave() -> TemplateLine {
    TemplateLine::navigation("exit", Config)
}

fn commands() -> CommandTemplates {
    CommandTemplates {
        escalate: vec![TemplateLine::navigation("enable", Privileged)],
        deescalate: vec![TemplateLine::navigation("exit", User)],
        logout: vec![TemplateLine::navigation("exit", User)],
        session_setup: vec![TemplateLine::navigation("terminal length 0", Privileged)],

        enter_config: vec![TemplateLine::navigation("configure", Config)],
        exit_config: vec![TemplateLine::navigation("end", Privileged)],
        save: vec![
            TemplateLine::navigation("copy running-config startup-config", Privileged)
                .with_require_any("Saving user config OK!")
                .with_require_any("Succeed"),
        ],

        show_vlan: vec![TemplateLine::navigation("show vlan", Privileged)],
        show_running_config: vec![TemplateLine::navigation("show running-config", Privileged)],

        create_vlan: vec![TemplateLine::new("vlan {vlan}", Config)],
        name_vlan: vec![TemplateLine::new("name {name}", Config), leave()],
        delete_vlan: vec![TemplateLine::new("no vlan {vlan}", Config)],
        delete_vlan_range: vec![TemplateLine::new("no vlan {start}-{end}", Config)],

        port_reset: vec![
            interface(),
            TemplateLine::new("no switchport general allowed vlan all", Config),
            TemplateLine::new("switchport pvid {default_vlan}", Config),
            leave(),
        ],
        port_untagged: vec![
            interface(),
            TemplateLine::new("switchport general allowed vlan {vlan} untagged", Config),
            TemplateLine::new("switchport pvid {vlan}", Config),
            leave(),
        ],
        port_tagged: vec![
            interface(),
            TemplateLine::new("switchport general allowed vlan {vlan} tagged", Config),
            leave(),
        ],
        port_access: vec![
            interface(),
            TemplateLine::new("switchport general allowed vlan {vlan} untagged", Config),
            TemplateLine::new("switchport pvid {vlan}", Config),
            leave(),
        ],
        port_trunk: vec![
            interface(),
            TemplateLine::new("switchport general allowed vlan {vlans} tagged", Config),
            TemplateLine::new("switchport pvid {native}", Config),
            leave(),
        ],

        lag_join: vec![
            interface(),
            TemplateLine::new("channel-group {lag} mode {mode}", Config),
            leave(),
        ],
        lag_leave: vec![
            interface(),
            TemplateLine::new("no channel-group", Config),
            leave(),
        ],
        lag_delete: vec![TemplateLine::new("no interface port-channel {lag}", Config)],
    }
}

/// Create the TP-Link SG dialect.
pub fn dialect() -> Result<Dialect, DialectError> {
    let observation = Observation {
        vlan: compile_line_regex(
            "vlan observation",
            Some(r"^[ \t]*(\d+)[ \t]+(.+?)[ \t]+(?:active|suspend|creating)(?:[ \t]+(.*?))?[ \t\r]*$"),
        )?,
        ports: compile_line_regex(
            "port list observation",
            Some(r"Gi1/0/(\d+)(?:-(?:Gi1/0/)?(\d+))?"),
        )?,
        interface: compile_line_regex(
            "interface observation",
            Some(r"^\s*interface\s+gigabitEthernet\s+1/0/(\d+)"),
        )?,
        channel_group: compile_line_regex(
            "channel-group observation",
            Some(r"^\s*channel-group\s+(\d+)\s+mode\s+(\w+)"),
        )?,
    };

    let dialect = Dialect::new("tplink_sg")
        .with_prompt(PromptPattern::regex(
            PromptKind::Login,
            r"(?i)(?:user(?:name)?|login):\s*$",
        )?)
        .with_prompt(PromptPattern::regex(PromptKind::Password, r"(?i)password:\s*$")?)
        .with_prompt(PromptPattern::regex(User, r"[\w.\-]{1,63}>\s*$")?)
        // not_contains "(config" keeps sub-mode prompts out of privileged
        .with_prompt(
            PromptPattern::regex(Privileged, r"[\w.\-]{1,63}#\s*$")?.with_not_contains("(config"),
        )
        .with_prompt(PromptPattern::regex(
            Config,
            r"[\w.\-]{1,63}\(config[\w.\-/: ]*\)#\s*$",
        )?)
        .with_prompt(PromptPattern::regex(
            PromptKind::Continuation,
            r"(?i)(?:\[y/n\]|\(y/n\)|\[confirm\])\s*[:?]?\s*$",
        )?)
        .with_error("Error")
        .with_error("Invalid")
        .with_error("Bad command")
        .with_error("Permission denied")
        .with_error("Access denied")
        .with_commands(commands())
        .with_tolerate_exists("already exist")
        .with_tolerate_exists("already a member")
        .with_tolerate_absent("not exist")
        .with_tolerate_absent("not found")
        .with_default_vlan(1)
        .with_max_lag_id(8)
        .with_max_port(10)
        .with_observation(observation);

    dialect.validate()?;
    Ok(dialect)
}
