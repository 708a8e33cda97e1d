//! Result collection: per-step results folded into one [`Outcome`].

use std::fmt;
use std::time::Duration;

use crate::error::SessionError;
use crate::plan::{CommandStep, Section};
use crate::session::SessionState;

/// What happened to one command step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The device accepted the command.
    Applied,
    /// The device answered with a tolerated message ("already exists").
    Unchanged,
    /// The device rejected the command, or a required confirmation was missing.
    Rejected,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub command: String,
    pub status: StepStatus,

    /// Raw output between the echo and the prompt. Kept for auditing,
    /// never parsed.
    pub output: String,

    /// The device's rejection or tolerated message, when there was one.
    pub message: Option<String>,

    pub section: Section,
    pub mutating: bool,
    pub best_effort: bool,
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Rejected
    }
}

/// Structured result of one session, handed to the orchestration layer.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// `host:port` of the device.
    pub device: String,

    /// At least one mutating step was applied.
    pub changed: bool,

    /// Every step executed, in order. Steps after an abort are absent.
    pub steps: Vec<StepResult>,

    /// Terminal classification; `None` when the whole plan ran.
    pub error: Option<SessionError>,

    /// State of the machine when the session ended.
    pub final_state: SessionState,

    /// Everything the device printed, escape sequences removed.
    pub transcript: String,

    pub elapsed: Duration,
}

impl Outcome {
    /// The plan ran to completion. Best-effort rejections may be present.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The session failed after changing something on the device.
    pub fn is_partial(&self) -> bool {
        self.error.as_ref().is_some_and(SessionError::is_failure) && self.changed
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(SessionError::Cancelled))
    }

    /// Rejected steps, best-effort ones included.
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.is_failure())
    }

    /// All step outputs joined, for backup collaborators.
    pub fn output(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.output.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Accumulates step results while a session runs.
#[derive(Debug)]
pub struct ResultCollector {
    device: String,
    steps: Vec<StepResult>,
    started: tokio::time::Instant,
}

impl ResultCollector {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            steps: Vec::new(),
            started: tokio::time::Instant::now(),
        }
    }

    pub fn record(
        &mut self,
        step: &CommandStep,
        status: StepStatus,
        output: impl Into<String>,
        message: Option<String>,
    ) {
        self.steps.push(StepResult {
            command: step.command.clone(),
            status,
            output: output.into(),
            message,
            section: step.section,
            mutating: step.mutating,
            best_effort: step.best_effort,
        });
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn finish(
        self,
        error: Option<SessionError>,
        final_state: SessionState,
        transcript: String,
    ) -> Outcome {
        let changed = self
            .steps
            .iter()
            .any(|s| s.mutating && s.status == StepStatus::Applied);
        Outcome {
            device: self.device,
            changed,
            steps: self.steps,
            error,
            final_state,
            transcript,
            elapsed: self.started.elapsed(),
        }
    }
}
