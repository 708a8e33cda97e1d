//! Session protocol: drive one device from connect to logout.
//!
//! [`run_plan`] opens a session, logs in, escalates, runs every step of a
//! [`Plan`] and logs out again. Whatever happens, it returns an
//! [`Outcome`]; the transport is closed exactly once on every path.
//! [`observe_vlans`] and [`capture_running_config`] are read-only sessions
//! with the same guarantees.
//!
//! ```rust,no_run
//! use ferriswitch::dialect::DialectRegistry;
//! use ferriswitch::plan::{DesiredState, Mode, PlanRequest, Vlan, build_plan};
//! use ferriswitch::session::{SessionConfig, run_plan};
//! use ferriswitch::transport::{DeviceConnector, DeviceTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), ferriswitch::Error> {
//! let registry = DialectRegistry::builtin()?;
//! let dialect = registry.get("tplink_sg")?;
//! let target = DeviceTarget::builder("192.168.0.1")
//!     .username("admin")
//!     .password("admin")
//!     .dialect("tplink_sg")
//!     .build()?;
//!
//! let desired = DesiredState::default().with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]));
//! let plan = build_plan(&dialect, &PlanRequest::new(desired, Mode::Add))?;
//!
//! let outcome = run_plan(
//!     &DeviceConnector,
//!     &target,
//!     &dialect,
//!     &plan,
//!     &SessionConfig::default(),
//!     &CancellationToken::new(),
//! )
//! .await;
//! println!("changed: {}", outcome.changed);
//! # Ok(())
//! # }
//! ```

mod machine;
mod state;

pub use state::{FailureReason, SessionState};

use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::channel::PtyConfig;
use crate::dialect::{Dialect, observe};
use crate::error::{Error, PlanError, SessionError};
use crate::outcome::{Outcome, ResultCollector};
use crate::plan::{ObservedState, Plan};
use crate::transport::{Connector, DeviceTarget};
use machine::Session;

/// Timing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Prompt matching configuration.
    pub pty: PtyConfig,

    /// How long to wait for the device to hang up after logout.
    pub logout_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pty: PtyConfig::default(),
            logout_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.pty.timeout = timeout;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.pty.settle_timeout = timeout;
        self
    }

    pub fn with_search_depth(mut self, depth: usize) -> Self {
        self.pty.search_depth = depth;
        self
    }

    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }
}

/// Execute `plan` against one device.
pub async fn run_plan<C: Connector>(
    connector: &C,
    target: &DeviceTarget,
    dialect: &Dialect,
    plan: &Plan,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> Outcome {
    let mut collector = ResultCollector::new(target.socket_addr());

    let mut session = match Session::connect(connector, target, dialect, config, cancel).await {
        Ok(session) => session,
        Err(err) => {
            warn!("{}: {}", target.socket_addr(), err);
            let state = SessionState::after(&err);
            return collector.finish(Some(err), state, String::new());
        }
    };

    let result: Result<(), SessionError> = async {
        session.open().await?;
        session.drive(plan, &mut collector).await?;
        session.leave().await
    }
    .await;

    if let Err(err) = &result {
        session.abort(err).await;
    } else {
        info!(
            "{}: plan finished, {} steps",
            target.socket_addr(),
            collector.steps().len()
        );
    }

    let final_state = session.state();
    let transcript = session.transcript();
    collector.finish(result.err(), final_state, transcript)
}

/// Read the device's current VLANs (and LAGs, when the dialect knows how
/// to find them) without changing anything.
pub async fn observe_vlans<C: Connector>(
    connector: &C,
    target: &DeviceTarget,
    dialect: &Dialect,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> Result<ObservedState, Error> {
    if dialect.commands.show_vlan.is_empty() {
        return Err(PlanError::MissingTemplate {
            dialect: dialect.name.clone(),
            operation: "show_vlan".into(),
        }
        .into());
    }
    let lags_observable = dialect.observation.interface.is_some()
        && dialect.observation.channel_group.is_some()
        && !dialect.commands.show_running_config.is_empty();

    let mut session = Session::connect(connector, target, dialect, config, cancel).await?;

    let result: Result<ObservedState, SessionError> = async {
        session.open().await?;
        let vlans = session.capture(&dialect.commands.show_vlan).await?;
        let running = if lags_observable {
            Some(session.capture(&dialect.commands.show_running_config).await?)
        } else {
            None
        };
        session.leave().await?;
        Ok(observe::observed_state(dialect, &vlans, running.as_deref()))
    }
    .await;

    match result {
        Ok(observed) => {
            info!(
                "{}: observed {} vlans, {} lags",
                target.socket_addr(),
                observed.vlans.len(),
                observed.lags.len()
            );
            Ok(observed)
        }
        Err(err) => {
            session.abort(&err).await;
            Err(err.into())
        }
    }
}

/// Fetch the device's running configuration without changing anything.
///
/// The returned text excludes the command echo and the trailing prompt.
pub async fn capture_running_config<C: Connector>(
    connector: &C,
    target: &DeviceTarget,
    dialect: &Dialect,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    if dialect.commands.show_running_config.is_empty() {
        return Err(PlanError::MissingTemplate {
            dialect: dialect.name.clone(),
            operation: "show_running_config".into(),
        }
        .into());
    }

    let mut session = Session::connect(connector, target, dialect, config, cancel).await?;

    let result: Result<String, SessionError> = async {
        session.open().await?;
        let running = session.capture(&dialect.commands.show_running_config).await?;
        session.leave().await?;
        Ok(running)
    }
    .await;

    match result {
        Ok(running) => {
            info!(
                "{}: captured running config, {} lines",
                target.socket_addr(),
                running.lines().count()
            );
            Ok(running)
        }
        Err(err) => {
            session.abort(&err).await;
            Err(err.into())
        }
    }
}
