//! # Ferriswitch
//!
//! Async session automation for line-mode switch CLIs reached over SSH or
//! Telnet.
//!
//! Ferriswitch turns a declared VLAN/port/LAG layout into an ordered plan
//! of CLI commands, drives an interactive session through login, privilege
//! escalation and configuration mode, and reports exactly which commands
//! the device accepted.
//!
//! ## Features
//!
//! - SSH (russh) and Telnet transports behind one `Transport` trait
//! - Tail-anchored prompt matching with error-first precedence
//! - Explicit session state machine with fail-fast and best-effort steps
//! - Vendor dialects as data: built-in TP-Link and Cisco IOS, or load your own
//! - Add and replace reconciliation with protected VLANs, ports and LAGs
//! - Read-only sessions for VLAN observation and running-config capture
//! - Bounded-concurrency fleet runs with per-device cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferriswitch::dialect::DialectRegistry;
//! use ferriswitch::plan::{DesiredState, Mode, PlanRequest, Vlan, build_plan};
//! use ferriswitch::session::{SessionConfig, run_plan};
//! use ferriswitch::transport::{DeviceConnector, DeviceTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ferriswitch::Error> {
//!     let registry = DialectRegistry::builtin()?;
//!     let dialect = registry.get("tplink_sg")?;
//!
//!     let target = DeviceTarget::builder("192.168.0.1")
//!         .username("admin")
//!         .password("secret")
//!         .dialect("tplink_sg")
//!         .build()?;
//!
//!     let desired = DesiredState::default()
//!         .with_vlan(Vlan::new(10, "Mgmt").with_untagged([1, 2]))
//!         .with_vlan(Vlan::new(20, "Clients").with_tagged([8]));
//!     let plan = build_plan(&dialect, &PlanRequest::new(desired, Mode::Add))?;
//!
//!     let outcome = run_plan(
//!         &DeviceConnector,
//!         &target,
//!         &dialect,
//!         &plan,
//!         &SessionConfig::default(),
//!         &CancellationToken::new(),
//!     )
//!     .await;
//!
//!     println!("changed: {}, error: {:?}", outcome.changed, outcome.error);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod dialect;
pub mod error;
pub mod fleet;
pub mod outcome;
pub mod plan;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use dialect::{Dialect, DialectRegistry};
pub use error::{Error, SessionError};
pub use fleet::{Fleet, FleetJob, run_fleet};
pub use outcome::{Outcome, StepResult, StepStatus};
pub use plan::{DesiredState, Mode, Plan, PlanRequest, build_plan};
pub use session::{
    SessionConfig, SessionState, capture_running_config, observe_vlans, run_plan,
};
pub use transport::{DeviceConnector, DeviceTarget};
