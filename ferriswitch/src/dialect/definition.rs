//! Dialect definition: prompt table plus command templates for one CLI family.

use std::collections::BTreeSet;

use regex::Regex;
use serde::Deserialize;

use super::template::CommandTemplates;
use crate::channel::{PromptKind, PromptPattern, PromptTable};
use crate::error::DialectError;

/// Everything the core needs to drive one CLI family.
///
/// Dialects are plain data. The built-in ones are assembled in code with
/// the `with_*` methods; others are loaded from a [`DialectSpec`].
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Dialect name (e.g., "tplink_sg", "cisco_ios").
    pub name: String,

    /// Prompt patterns, precedence-ordered.
    pub prompts: PromptTable,

    /// Command syntax per operation.
    pub commands: CommandTemplates,

    /// Answers meaning a creation was a no-op ("already exists").
    pub tolerate_exists: Vec<String>,

    /// Answers meaning a deletion target was already gone.
    pub tolerate_absent: Vec<String>,

    /// VLAN that ports fall back to when reset; never deleted.
    pub default_vlan: u16,

    /// Highest LAG (port-channel) id the platform accepts.
    pub max_lag_id: u16,

    /// Number of front-panel ports; 0 when unknown. Blind replace resets
    /// every port up to this number.
    pub max_port: u16,

    /// VLANs the platform creates itself and refuses to delete.
    pub reserved_vlans: BTreeSet<u16>,

    /// Longest VLAN name the CLI accepts.
    pub vlan_name_max: usize,

    /// Parsers for read-only show command output.
    pub observation: Observation,
}

/// Line parsers for `show` output. All are multi-line regexes.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Captures VLAN id (1), name (2) and, optionally, the member port
    /// list (3) on a `show vlan` row.
    pub vlan: Option<Regex>,

    /// Captures one port (1), or a port range (1)-(2), in a member port
    /// list. Indented lines after a row continue its list.
    pub ports: Option<Regex>,

    /// Captures the port number (1) on an interface header line of the
    /// running config.
    pub interface: Option<Regex>,

    /// Captures LAG id (1) and mode (2) inside an interface block.
    pub channel_group: Option<Regex>,
}

impl Dialect {
    /// Create a dialect with no prompts and no templates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompts: PromptTable::default(),
            commands: CommandTemplates::default(),
            tolerate_exists: vec![],
            tolerate_absent: vec![],
            default_vlan: 1,
            max_lag_id: 8,
            max_port: 0,
            reserved_vlans: BTreeSet::new(),
            vlan_name_max: 32,
            observation: Observation::default(),
        }
    }

    pub fn with_prompt(mut self, pattern: PromptPattern) -> Self {
        self.prompts.push(pattern);
        self
    }

    /// Add a rejection message, matched anywhere in the output.
    pub fn with_error(self, text: impl Into<String>) -> Self {
        self.with_prompt(PromptPattern::contains(PromptKind::Error, text))
    }

    pub fn with_commands(mut self, commands: CommandTemplates) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_tolerate_exists(mut self, text: impl Into<String>) -> Self {
        self.tolerate_exists.push(text.into());
        self
    }

    pub fn with_tolerate_absent(mut self, text: impl Into<String>) -> Self {
        self.tolerate_absent.push(text.into());
        self
    }

    pub fn with_default_vlan(mut self, vlan: u16) -> Self {
        self.default_vlan = vlan;
        self
    }

    pub fn with_max_lag_id(mut self, max: u16) -> Self {
        self.max_lag_id = max;
        self
    }

    pub fn with_max_port(mut self, max: u16) -> Self {
        self.max_port = max;
        self
    }

    pub fn with_reserved_vlans(mut self, vlans: impl IntoIterator<Item = u16>) -> Self {
        self.reserved_vlans.extend(vlans);
        self
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = observation;
        self
    }

    /// Check that the table can carry a session at all.
    pub fn validate(&self) -> Result<(), DialectError> {
        if !self.prompts.has(PromptKind::User) && !self.prompts.has(PromptKind::Privileged) {
            return Err(DialectError::MissingPrompt {
                dialect: self.name.clone(),
                kind: "user or privileged".to_string(),
            });
        }
        if !self.commands.enter_config.is_empty() && !self.prompts.has(PromptKind::Config) {
            return Err(DialectError::MissingPrompt {
                dialect: self.name.clone(),
                kind: PromptKind::Config.to_string(),
            });
        }
        Ok(())
    }
}

/// How a [`PromptSpec`] matches.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSpec {
    Suffix(String),
    Contains(String),
    Regex(String),
}

/// Serialized form of a [`PromptPattern`].
#[derive(Debug, Clone, Deserialize)]
pub struct PromptSpec {
    pub kind: PromptKind,
    pub matcher: MatchSpec,
    #[serde(default)]
    pub not_contains: Vec<String>,
}

impl PromptSpec {
    fn compile(&self) -> Result<PromptPattern, DialectError> {
        let pattern = match &self.matcher {
            MatchSpec::Suffix(text) => PromptPattern::suffix(self.kind, text.as_str()),
            MatchSpec::Contains(text) => PromptPattern::contains(self.kind, text.as_str()),
            MatchSpec::Regex(pattern) => PromptPattern::regex(self.kind, pattern)?,
        };
        Ok(self
            .not_contains
            .iter()
            .fold(pattern, |p, nc| p.with_not_contains(nc.as_str())))
    }
}

/// Serialized observation parsers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObservationSpec {
    pub vlan: Option<String>,
    pub ports: Option<String>,
    pub interface: Option<String>,
    pub channel_group: Option<String>,
}

fn default_vlan() -> u16 {
    1
}

fn default_max_lag_id() -> u16 {
    8
}

fn default_vlan_name_max() -> usize {
    32
}

/// A dialect as the orchestration layer hands it over (JSON, YAML, ...).
///
/// # Example
///
/// ```rust
/// use ferriswitch::dialect::DialectSpec;
///
/// let spec: DialectSpec = serde_json::from_str(r#"{
///     "name": "lab",
///     "prompts": [
///         {"kind": "privileged", "matcher": {"suffix": "lab#"}},
///         {"kind": "config", "matcher": {"suffix": "lab(config)#"}},
///         {"kind": "error", "matcher": {"contains": "Error"}}
///     ],
///     "commands": {
///         "enter_config": [{"text": "configure"}],
///         "create_vlan": [{"text": "create vlan {vlan}"}]
///     }
/// }"#).unwrap();
/// let dialect = spec.compile().unwrap();
/// assert_eq!(dialect.name, "lab");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DialectSpec {
    pub name: String,
    pub prompts: Vec<PromptSpec>,
    #[serde(default)]
    pub commands: CommandTemplates,
    #[serde(default)]
    pub tolerate_exists: Vec<String>,
    #[serde(default)]
    pub tolerate_absent: Vec<String>,
    #[serde(default = "default_vlan")]
    pub default_vlan: u16,
    #[serde(default = "default_max_lag_id")]
    pub max_lag_id: u16,
    #[serde(default)]
    pub max_port: u16,
    #[serde(default)]
    pub reserved_vlans: BTreeSet<u16>,
    #[serde(default = "default_vlan_name_max")]
    pub vlan_name_max: usize,
    #[serde(default)]
    pub observation: ObservationSpec,
}

impl DialectSpec {
    /// Compile patterns and validate the result.
    pub fn compile(&self) -> Result<Dialect, DialectError> {
        let patterns = self
            .prompts
            .iter()
            .map(PromptSpec::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let dialect = Dialect {
            name: self.name.clone(),
            prompts: PromptTable::new(patterns),
            commands: self.commands.clone(),
            tolerate_exists: self.tolerate_exists.clone(),
            tolerate_absent: self.tolerate_absent.clone(),
            default_vlan: self.default_vlan,
            max_lag_id: self.max_lag_id,
            max_port: self.max_port,
            reserved_vlans: self.reserved_vlans.clone(),
            vlan_name_max: self.vlan_name_max,
            observation: Observation {
                vlan: compile_line_regex("vlan observation", self.observation.vlan.as_deref())?,
                ports: compile_line_regex(
                    "port list observation",
                    self.observation.ports.as_deref(),
                )?,
                interface: compile_line_regex(
                    "interface observation",
                    self.observation.interface.as_deref(),
                )?,
                channel_group: compile_line_regex(
                    "channel-group observation",
                    self.observation.channel_group.as_deref(),
                )?,
            },
        };
        dialect.validate()?;
        Ok(dialect)
    }
}

/// Compile an observation regex with `^`/`$` matching at line boundaries.
pub(crate) fn compile_line_regex(
    kind: &str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, DialectError> {
    pattern
        .map(|p| {
            Regex::new(&format!("(?m){}", p)).map_err(|source| DialectError::InvalidPattern {
                kind: kind.to_string(),
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()
}
