//! Cisco IOS (Catalyst) dialect.
//!
//! # Prompt Examples
//!
//! ```text
//! Password:                          # vty login (password only)
//! Switch>                            # user mode
//! Switch#                            # privileged mode
//! Switch(config)#                    # configuration mode
//! Switch(config-if)#                 # config sub-mode (interface)
//! Switch(vlan)#                      # legacy vlan database
//! ```
//!
//! `enable` asks for the enable secret; the session answers with the
//! enable password when one is set and the login password otherwise.

use std::time::Duration;

use crate::channel::{PromptKind, PromptPattern};
use crate::dialect::definition::{Dialect, Observation, compile_line_regex};
use crate::dialect::template::{CommandTemplates, TemplateLine};
use crate::error::DialectError;

use PromptKind::{Config, Privileged, User};

fn interface() -> TemplateLine {
    TemplateLine::navigation("interface FastEthernet0/{port}", Config)
}

fn leave() -> TemplateLine {
    TemplateLine::navigation("exit", Config)
}

fn commands() -> CommandTemplates {
    CommandTemplates {
        escalate: vec![TemplateLine::navigation("enable", Privileged)],
        deescalate: vec![TemplateLine::navigation("disable", User)],
        logout: vec![TemplateLine::navigation("exit", User)],
        session_setup: vec![TemplateLine::navigation("terminal length 0", Privileged)],

        enter_config: vec![TemplateLine::navigation("configure terminal", Config)],
        exit_config: vec![TemplateLine::navigation("end", Privileged)],
        // NVRAM writes on older Catalysts take a while
        save: vec![
            TemplateLine::navigation("write memory", Privileged)
                .with_require_any("[OK]")
                .with_timeout(Duration::from_secs(60)),
        ],

        show_vlan: vec![TemplateLine::navigation("show vlan", Privileged)],
        show_running_config: vec![TemplateLine::navigation("show running-config", Privileged)],

        create_vlan: vec![TemplateLine::new("vlan {vlan}", Config)],
        name_vlan: vec![TemplateLine::new("name {name}", Config), leave()],
        delete_vlan: vec![TemplateLine::new("no vlan {vlan}", Config)],
        delete_vlan_range: vec![TemplateLine::new("no vlan {start}-{end}", Config)],

        port_reset: vec![
            interface(),
            TemplateLine::new("switchport mode access", Config),
            TemplateLine::new("switchport access vlan {default_vlan}", Config),
            TemplateLine::new("no switchport trunk allowed vlan", Config),
            TemplateLine::new("no switchport trunk native vlan", Config),
            leave(),
        ],
        port_untagged: vec![
            interface(),
            TemplateLine::new("switchport mode access", Config),
            TemplateLine::new("switchport access vlan {vlan}", Config),
            leave(),
        ],
        port_tagged: vec![
            interface(),
            TemplateLine::new("switchport mode trunk", Config),
            TemplateLine::new("switchport trunk allowed vlan add {vlan}", Config),
            leave(),
        ],
        port_access: vec![
            interface(),
            TemplateLine::new("switchport mode access", Config),
            TemplateLine::new("switchport access vlan {vlan}", Config),
            leave(),
        ],
        port_trunk: vec![
            interface(),
            TemplateLine::new("switchport mode trunk", Config),
            TemplateLine::new("switchport trunk native vlan {native}", Config),
            TemplateLine::new("switchport trunk allowed vlan {vlans}", Config),
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
        lag_delete: vec![TemplateLine::new("no interface Port-channel{lag}", Config)],
    }
}

/// Create the Cisco IOS dialect.
pub fn dialect() -> Result<Dialect, DialectError> {
    let observation = Observation {
        vlan: compile_line_regex(
            "vlan observation",
            Some(r"^(\d+)[ \t]+(.+?)[ \t]+(?:active|suspend|act/unsup|act/lshut|sus/lshut)(?:[ \t]+(.*?))?[ \t\r]*$"),
        )?,
        ports: compile_line_regex("port list observation", Some(r"Fa0/(\d+)"))?,
        interface: compile_line_regex(
            "interface observation",
            Some(r"^interface\s+FastEthernet\s?0/(\d+)"),
        )?,
        channel_group: compile_line_regex(
            "channel-group observation",
            Some(r"^\s*channel-group\s+(\d+)\s+mode\s+(\w+)"),
        )?,
    };

    let dialect = Dialect::new("cisco_ios")
        .with_prompt(PromptPattern::regex(PromptKind::Login, r"(?i)username:\s*$")?)
        .with_prompt(PromptPattern::regex(PromptKind::Password, r"(?i)password:\s*$")?)
        .with_prompt(PromptPattern::regex(User, r"[\w.\-@/:]{1,63}>\s*$")?)
        .with_prompt(
            PromptPattern::regex(Privileged, r"[\w.\-@/:]{1,63}#\s*$")?
                .with_not_contains("(config")
                .with_not_contains("(vlan)"),
        )
        .with_prompt(PromptPattern::regex(
            Config,
            r"[\w.\-@/:]{1,63}\((?:config[\w.\-@/:+]*|vlan)\)#\s*$",
        )?)
        .with_prompt(PromptPattern::regex(
            PromptKind::Continuation,
            r"(?i)(?:\[confirm\]|\[yes/no\]|\[terminal\]\?)\s*:?\s*$",
        )?)
        .with_error("% Invalid input")
        .with_error("% Incomplete command")
        .with_error("% Ambiguous command")
        .with_error("% Unknown command")
        .with_error("% Bad secrets")
        .with_error("% Bad passwords")
        .with_error("% Access denied")
        .with_error("% Login invalid")
        .with_error("% Authentication failed")
        .with_error("% Error")
        // Any other "%Word ..." line; syslog lines ("%LINK-3-UPDOWN:") do not match
        .with_prompt(PromptPattern::regex(PromptKind::Error, r"(?m)^%\s?[A-Za-z]+\s")?)
        .with_commands(commands())
        .with_tolerate_exists("already exist")
        .with_tolerate_absent("not found")
        .with_tolerate_absent("does not exist")
        .with_default_vlan(1)
        .with_max_lag_id(6)
        .with_max_port(24)
        .with_reserved_vlans(1002..=1005)
        .with_observation(observation);

    dialect.validate()?;
    Ok(dialect)
}
