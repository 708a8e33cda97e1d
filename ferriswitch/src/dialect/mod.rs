//! CLI dialects: prompt patterns and command syntax per device family.
//!
//! A dialect is a data record selected by name when a session opens. The
//! session state machine and the script builder read from it; nothing in
//! the core is specialised per vendor.

mod definition;
pub mod observe;
mod registry;
mod template;
pub mod vendors;

pub use definition::{Dialect, MatchSpec, Observation, ObservationSpec, DialectSpec, PromptSpec};
pub use registry::DialectRegistry;
pub use template::{CommandTemplates, Template, TemplateLine, Vars, render};
