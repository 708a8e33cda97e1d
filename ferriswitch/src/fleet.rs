//! Multi-device execution: one task per device, bounded concurrency.
//!
//! Every device gets its own session and its own cancellation token, a
//! child of the fleet token. Cancelling the fleet stops everything;
//! cancelling one device's token stops only that device.

use std::sync::Arc;

use log::{error, info};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dialect::{Dialect, DialectRegistry};
use crate::error::{DialectError, SessionError};
use crate::outcome::{Outcome, ResultCollector};
use crate::plan::Plan;
use crate::session::{FailureReason, SessionConfig, SessionState, run_plan};
use crate::transport::{Connector, DeviceTarget};

/// Sessions allowed to run at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One device's share of a fleet run.
#[derive(Debug)]
pub struct FleetJob {
    pub target: DeviceTarget,
    pub dialect: Arc<Dialect>,
    pub plan: Plan,
    cancel: Option<CancellationToken>,
}

impl FleetJob {
    pub fn new(target: DeviceTarget, dialect: Arc<Dialect>, plan: Plan) -> Self {
        Self {
            target,
            dialect,
            plan,
            cancel: None,
        }
    }

    /// Look the dialect up by the name the target declares.
    pub fn resolve(
        target: DeviceTarget,
        registry: &DialectRegistry,
        plan: Plan,
    ) -> Result<Self, DialectError> {
        let dialect = registry.for_target(&target)?;
        Ok(Self::new(target, dialect, plan))
    }

    /// Use `token` for this device instead of a fresh child of the fleet
    /// token. Pass a token from [`Fleet::device_token`] so that cancelling
    /// the fleet still reaches it.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs plans against many devices in parallel.
pub struct Fleet<C: Connector> {
    connector: Arc<C>,
    session: SessionConfig,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<C: Connector + 'static> Fleet<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self {
            connector,
            session: SessionConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Maximum number of concurrent sessions (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Derive the fleet token from `parent`.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Token that cancels every device of this fleet.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A per-device token, cancelled along with the fleet.
    pub fn device_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Run every job and return the outcomes in job order.
    pub async fn run(&self, jobs: Vec<FleetJob>) -> Vec<Outcome> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let devices: Vec<String> = jobs.iter().map(|j| j.target.socket_addr()).collect();
        let mut outcomes: Vec<Option<Outcome>> = devices.iter().map(|_| None).collect();

        info!(
            "running {} devices, at most {} at once",
            jobs.len(),
            self.concurrency
        );

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let connector = Arc::clone(&self.connector);
            let permits = Arc::clone(&permits);
            let session = self.session.clone();
            let cancel = job.cancel.clone().unwrap_or_else(|| self.device_token());

            tasks.spawn(async move {
                // A cancelled device never connects: run_plan sees the
                // token before opening a transport.
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                let outcome = run_plan(
                    connector.as_ref(),
                    &job.target,
                    &job.dialect,
                    &job.plan,
                    &session,
                    &cancel,
                )
                .await;
                (index, outcome)
            });
        }

        while let Some(res) = tasks.join_next().await {
            match res {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!("device task failed: {}", e),
            }
        }

        outcomes
            .into_iter()
            .zip(devices)
            .map(|(outcome, device)| outcome.unwrap_or_else(|| lost(device)))
            .collect()
    }
}

/// Outcome for a device whose task died before reporting.
fn lost(device: String) -> Outcome {
    let err = SessionError::Protocol {
        state: "running".into(),
        detail: "session task terminated abnormally".into(),
        tail: String::new(),
    };
    ResultCollector::new(device).finish(
        Some(err),
        SessionState::Failed(FailureReason::ProtocolError),
        String::new(),
    )
}

/// Run `jobs` with at most `concurrency` sessions at once.
///
/// Shorthand for a one-off [`Fleet`] whose token is a child of `cancel`.
pub async fn run_fleet<C: Connector + 'static>(
    connector: Arc<C>,
    jobs: Vec<FleetJob>,
    concurrency: usize,
    session: &SessionConfig,
    cancel: &CancellationToken,
) -> Vec<Outcome> {
    Fleet::new(connector)
        .with_concurrency(concurrency)
        .with_session_config(session.clone())
        .with_parent(cancel)
        .run(jobs)
        .await
}
