//! Command templates: the vendor syntax for each operation, as data.
//!
//! A template is a list of lines. Each line becomes one command step and
//! carries the prompt kind the device shows once it has accepted the line.
//! Placeholders are written `{name}` and filled from [`Vars`].

use std::time::Duration;

use serde::Deserialize;

use crate::channel::PromptKind;
use crate::error::PlanError;

fn default_expect() -> PromptKind {
    PromptKind::Config
}

/// One line of a command template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateLine {
    /// Command text with `{placeholder}` markers.
    pub text: String,

    /// Prompt that follows a successful send.
    #[serde(default = "default_expect")]
    pub expect: PromptKind,

    /// Benign messages; seeing one makes the step a no-op instead of a failure.
    #[serde(default)]
    pub tolerate: Vec<String>,

    /// When non-empty, at least one of these must appear in the output.
    #[serde(default)]
    pub require_any: Vec<String>,

    /// Overrides whether the line changes device state. Navigation lines
    /// (`interface ...`, `exit`) set this to `false`.
    #[serde(default)]
    pub mutating: Option<bool>,

    /// Per-line timeout override, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TemplateLine {
    pub fn new(text: impl Into<String>, expect: PromptKind) -> Self {
        Self {
            text: text.into(),
            expect,
            tolerate: vec![],
            require_any: vec![],
            mutating: None,
            timeout_secs: None,
        }
    }

    /// A line that only moves between CLI modes.
    pub fn navigation(text: impl Into<String>, expect: PromptKind) -> Self {
        Self {
            mutating: Some(false),
            ..Self::new(text, expect)
        }
    }

    pub fn with_tolerate(mut self, text: impl Into<String>) -> Self {
        self.tolerate.push(text.into());
        self
    }

    pub fn with_require_any(mut self, text: impl Into<String>) -> Self {
        self.require_any.push(text.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// An operation's command lines, in send order.
pub type Template = Vec<TemplateLine>;

/// Every operation the session and the script builder know how to send.
///
/// An empty template means the dialect does not support (or does not need)
/// the operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// User mode to privileged mode.
    pub escalate: Template,
    /// Privileged mode back to user mode.
    pub deescalate: Template,
    /// Ends the session; the device hangs up afterwards.
    pub logout: Template,
    /// Sent once after reaching privileged mode (paging off and similar).
    pub session_setup: Template,

    pub enter_config: Template,
    pub exit_config: Template,
    pub save: Template,

    pub show_vlan: Template,
    pub show_running_config: Template,

    /// `{vlan}`
    pub create_vlan: Template,
    /// `{vlan}`, `{name}`; sent right after `create_vlan`.
    pub name_vlan: Template,
    /// `{vlan}`
    pub delete_vlan: Template,
    /// `{start}`, `{end}`
    pub delete_vlan_range: Template,

    /// `{port}`, `{default_vlan}`
    pub port_reset: Template,
    /// `{port}`, `{vlan}`
    pub port_untagged: Template,
    /// `{port}`, `{vlan}`
    pub port_tagged: Template,
    /// `{port}`, `{vlan}`
    pub port_access: Template,
    /// `{port}`, `{vlans}`, `{native}`
    pub port_trunk: Template,

    /// `{port}`, `{lag}`, `{mode}`
    pub lag_join: Template,
    /// `{port}`, `{lag}`
    pub lag_leave: Template,
    /// `{lag}`
    pub lag_delete: Template,
}

/// Placeholder values for rendering a template.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    pairs: Vec<(&'static str, String)>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl ToString) -> Self {
        self.pairs.push((name, value.to_string()));
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Fill every `{placeholder}` in `text`.
///
/// Fails on a placeholder that has no value rather than sending the
/// literal marker to the device.
pub fn render(text: &str, vars: &Vars) -> Result<String, PlanError> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };

        let name = &after[..close];
        let value = vars.get(name).ok_or_else(|| PlanError::UnboundPlaceholder {
            template: text.to_string(),
            placeholder: name.to_string(),
        })?;
        out.push_str(value);
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let vars = Vars::new().set("port", 3).set("vlan", 10);
        assert_eq!(
            render("switchport general allowed vlan {vlan} untagged", &vars).unwrap(),
            "switchport general allowed vlan 10 untagged"
        );
        assert_eq!(
            render("interface gigabitEthernet 1/0/{port}", &vars).unwrap(),
            "interface gigabitEthernet 1/0/3"
        );
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let err = render("no vlan {start}-{end}", &Vars::new().set("start", 2)).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnboundPlaceholder {
                template: "no vlan {start}-{end}".into(),
                placeholder: "end".into(),
            }
        );
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(render("end", &Vars::new()).unwrap(), "end");
        assert_eq!(render("odd { text", &Vars::new()).unwrap(), "odd { text");
    }

    #[test]
    fn test_line_defaults_from_json() {
        let line: TemplateLine = serde_json::from_str(r#"{"text": "vlan {vlan}"}"#).unwrap();
        assert_eq!(line.expect, PromptKind::Config);
        assert_eq!(line.mutating, None);
        assert!(line.tolerate.is_empty());

        let templates: CommandTemplates = serde_json::from_str(
            r#"{"save": [{"text": "write memory", "expect": "privileged", "require_any": ["[OK]"]}]}"#,
        )
        .unwrap();
        assert_eq!(templates.save[0].expect, PromptKind::Privileged);
        assert!(templates.create_vlan.is_empty());
    }
}
