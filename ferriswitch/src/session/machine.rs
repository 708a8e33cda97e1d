//! The per-device protocol state machine.

use std::time::Duration;

use log::{debug, info, warn};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

use super::SessionConfig;
use super::state::SessionState;
use crate::channel::{DIAGNOSTIC_TAIL, PromptKind, PromptMatch, PtyChannel};
use crate::dialect::{Dialect, Template, TemplateLine};
use crate::error::{ChannelError, ConnectError, ConnectErrorKind, SessionError};
use crate::outcome::{ResultCollector, StepStatus};
use crate::plan::{CommandStep, Plan};
use crate::transport::{Connector, DeviceTarget, Transport};

const LOGIN_CANDIDATES: &[PromptKind] = &[
    PromptKind::Error,
    PromptKind::Login,
    PromptKind::Password,
    PromptKind::User,
    PromptKind::Privileged,
];

const ESCALATE_CANDIDATES: &[PromptKind] = &[
    PromptKind::Error,
    PromptKind::Password,
    PromptKind::User,
    PromptKind::Privileged,
];

const MODE_CANDIDATES: &[PromptKind] = &[
    PromptKind::Error,
    PromptKind::User,
    PromptKind::Privileged,
    PromptKind::Config,
];

const RESYNC_CANDIDATES: &[PromptKind] =
    &[PromptKind::User, PromptKind::Privileged, PromptKind::Config];

const STEP_CANDIDATES: &[PromptKind] = &[
    PromptKind::Error,
    PromptKind::Login,
    PromptKind::Password,
    PromptKind::User,
    PromptKind::Privileged,
    PromptKind::Config,
    PromptKind::Continuation,
];

/// Upper bound on mode changes while leaving (config, privileged, user).
const MAX_LEAVE_HOPS: usize = 4;

/// What one executed step produced.
struct Executed {
    status: StepStatus,
    output: String,
    message: Option<String>,
}

/// One open session: the channel plus where the CLI currently stands.
pub(crate) struct Session<'a, T: Transport> {
    channel: PtyChannel<T>,
    dialect: &'a Dialect,
    target: &'a DeviceTarget,
    config: &'a SessionConfig,
    cancel: &'a CancellationToken,
    state: SessionState,
    device: String,
}

impl<'a, T: Transport> Session<'a, T> {
    /// Open a transport within the target's connect timeout.
    pub(crate) async fn connect<C>(
        connector: &C,
        target: &'a DeviceTarget,
        dialect: &'a Dialect,
        config: &'a SessionConfig,
        cancel: &'a CancellationToken,
    ) -> Result<Self, SessionError>
    where
        C: Connector<Transport = T>,
    {
        if target.dialect != dialect.name {
            return Err(SessionError::DialectMismatch {
                target: target.dialect.clone(),
                dialect: dialect.name.clone(),
            });
        }

        let device = target.socket_addr();
        debug!("{}: connecting ({:?})", device, target.protocol);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = tokio::time::timeout(target.connect_timeout, connector.open(target)) => opened,
        };

        let transport = match opened {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectError::new(
                    ConnectErrorKind::Timeout,
                    device,
                    format!("no session within {:?}", target.connect_timeout),
                )
                .into());
            }
        };

        Ok(Self {
            channel: PtyChannel::new(transport, config.pty.clone(), target.line_ending),
            dialect,
            target,
            config,
            cancel,
            state: SessionState::Connecting,
            device,
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn transcript(&self) -> String {
        self.channel.transcript()
    }

    /// Log in, reach privileged mode and prepare the terminal.
    pub(crate) async fn open(&mut self) -> Result<(), SessionError> {
        self.login().await?;
        self.escalate().await?;
        self.setup().await;
        info!("{}: ready in {}", self.device, self.state);
        Ok(())
    }

    /// Run every step of `plan`, recording each result.
    ///
    /// A rejected step aborts the plan unless it is best-effort.
    pub(crate) async fn drive(
        &mut self,
        plan: &Plan,
        collector: &mut ResultCollector,
    ) -> Result<(), SessionError> {
        for step in plan {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let executed = match self.execute(step).await {
                Ok(executed) => executed,
                Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                Err(err) => {
                    let tail = match &err {
                        SessionError::Protocol { tail, .. } => tail.clone(),
                        _ => String::new(),
                    };
                    collector.record(step, StepStatus::Rejected, tail, Some(err.to_string()));
                    return Err(err);
                }
            };

            let rejected = executed.status == StepStatus::Rejected;
            let message = executed.message.clone();
            collector.record(step, executed.status, executed.output, executed.message);

            if rejected {
                let message = message.unwrap_or_default();
                if step.best_effort {
                    warn!(
                        "{}: '{}' rejected, continuing: {}",
                        self.device, step.command, message
                    );
                    continue;
                }
                return Err(SessionError::CommandRejected {
                    command: step.command.clone(),
                    message,
                });
            }
        }
        Ok(())
    }

    /// Run read-only commands and return everything they printed.
    pub(crate) async fn capture(&mut self, template: &Template) -> Result<String, SessionError> {
        let mut output = String::new();
        for line in template {
            self.send(&line.text, false).await?;
            let timeout = line.timeout().unwrap_or(self.config.pty.timeout);
            let found = self.await_prompt(MODE_CANDIDATES, timeout).await?;
            if found.kind == PromptKind::Error {
                let (text, kind) = self.settle(&found).await?;
                self.track(kind);
                return Err(SessionError::CommandRejected {
                    command: line.text.clone(),
                    message: rejection_line(&text, &found.prompt),
                });
            }
            self.track(found.kind);
            output.push_str(&found.output);
        }
        Ok(output)
    }

    /// Walk back down to user mode, log out and close the channel.
    pub(crate) async fn leave(&mut self) -> Result<(), SessionError> {
        let dialect = self.dialect;

        for _ in 0..MAX_LEAVE_HOPS {
            let template = match self.state {
                SessionState::ConfigMode => &dialect.commands.exit_config,
                SessionState::PrivilegedMode => &dialect.commands.deescalate,
                _ => break,
            };
            if template.is_empty() {
                break;
            }
            self.navigate(template).await?;
        }

        for line in &dialect.commands.logout {
            if !self.channel.is_open() {
                break;
            }
            self.send(&line.text, false).await?;
            if self
                .channel
                .await_close(self.config.logout_timeout, self.cancel)
                .await
            {
                debug!("{}: remote closed after '{}'", self.device, line.text);
                break;
            }
        }

        self.transition(SessionState::Closed);
        self.channel.close().await;
        Ok(())
    }

    /// Move to the terminal state for `err` and close the channel.
    pub(crate) async fn abort(&mut self, err: &SessionError) {
        if err.is_failure() {
            warn!("{}: {}", self.device, err);
        } else {
            info!("{}: cancelled", self.device);
        }
        self.transition(SessionState::after(err));
        self.channel.close().await;
    }

    async fn login(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::AwaitingLogin);
        let target = self.target;
        let mut username_sent = false;

        loop {
            let found = match self
                .channel
                .await_one(
                    &self.dialect.prompts,
                    LOGIN_CANDIDATES,
                    self.config.pty.timeout,
                    self.cancel,
                )
                .await
            {
                Ok(found) => found,
                Err(ChannelError::Cancelled) => return Err(SessionError::Cancelled),
                Err(err) if self.state == SessionState::AwaitingPassword => {
                    return Err(SessionError::AuthFailed {
                        detail: format!("no prompt after password: {}", err),
                    });
                }
                Err(err) => return Err(self.protocol(err)),
            };

            match found.kind {
                PromptKind::Login if username_sent => {
                    return Err(auth_failed("login prompt repeated"));
                }
                PromptKind::Login => {
                    username_sent = true;
                    self.send(&target.credentials.username, false).await?;
                }
                PromptKind::Password if self.state == SessionState::AwaitingPassword => {
                    return Err(auth_failed("password rejected"));
                }
                PromptKind::Password => {
                    self.transition(SessionState::AwaitingPassword);
                    self.send(target.credentials.password.expose_secret(), true)
                        .await?;
                }
                PromptKind::Error => {
                    let text = format!("{}{}{}", found.output, found.prompt, self.channel.tail_text());
                    return Err(SessionError::AuthFailed {
                        detail: rejection_line(&text, &found.prompt),
                    });
                }
                kind => {
                    self.track(kind);
                    return Ok(());
                }
            }
        }
    }

    /// Reach privileged mode from user mode, answering an enable password
    /// prompt if one appears.
    async fn escalate(&mut self) -> Result<(), SessionError> {
        let dialect = self.dialect;
        if self.state != SessionState::UserMode || dialect.commands.escalate.is_empty() {
            return Ok(());
        }

        for line in &dialect.commands.escalate {
            self.send(&line.text, false).await?;
            let timeout = line.timeout().unwrap_or(self.config.pty.timeout);
            let mut secret_sent = false;

            loop {
                let found = self.await_prompt(ESCALATE_CANDIDATES, timeout).await?;
                match found.kind {
                    PromptKind::Password if secret_sent => {
                        return Err(auth_failed("enable password rejected"));
                    }
                    PromptKind::Password => {
                        let secret = self.enable_secret()?;
                        self.send(&secret, true).await?;
                        secret_sent = true;
                    }
                    PromptKind::Error => {
                        let (text, _) = self.settle(&found).await?;
                        return Err(SessionError::AuthFailed {
                            detail: rejection_line(&text, &found.prompt),
                        });
                    }
                    kind if kind == line.expect => {
                        self.track(kind);
                        break;
                    }
                    kind => {
                        self.track(kind);
                        return Err(auth_failed("privilege escalation refused"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Session setup commands (pager off and the like). Failures are logged
    /// and ignored.
    async fn setup(&mut self) {
        let dialect = self.dialect;
        for line in &dialect.commands.session_setup {
            if let Err(err) = self.navigate(std::slice::from_ref(line)).await {
                warn!("{}: setup '{}' failed: {}", self.device, line.text, err);
            }
        }
    }

    /// Send mode-changing lines, tracking the prompt each one lands on.
    async fn navigate(&mut self, lines: &[TemplateLine]) -> Result<(), SessionError> {
        for line in lines {
            self.send(&line.text, false).await?;
            let timeout = line.timeout().unwrap_or(self.config.pty.timeout);
            let found = self.await_prompt(MODE_CANDIDATES, timeout).await?;
            let kind = if found.kind == PromptKind::Error {
                let (text, kind) = self.settle(&found).await?;
                warn!(
                    "{}: '{}' refused: {}",
                    self.device,
                    line.text,
                    rejection_line(&text, &found.prompt)
                );
                kind
            } else {
                found.kind
            };
            self.track(kind);
        }
        Ok(())
    }

    async fn execute(&mut self, step: &CommandStep) -> Result<Executed, SessionError> {
        self.send(&step.command, false).await?;
        let timeout = step.timeout.unwrap_or(self.config.pty.timeout);
        let found = self.await_prompt(STEP_CANDIDATES, timeout).await?;

        if found.kind == PromptKind::Error {
            let (text, kind) = self.settle(&found).await?;
            self.track(kind);
            if let Some(hit) = find_any(&text, &step.tolerate) {
                debug!("{}: '{}' tolerated ({})", self.device, step.command, hit);
                return Ok(Executed {
                    status: StepStatus::Unchanged,
                    message: Some(rejection_line(&text, hit)),
                    output: text,
                });
            }
            let message = rejection_line(&text, &found.prompt);
            return Ok(Executed {
                status: StepStatus::Rejected,
                output: text,
                message: Some(message),
            });
        }

        if found.kind != step.expect {
            self.track(found.kind);
            return Err(SessionError::Protocol {
                state: self.state.to_string(),
                detail: format!(
                    "'{}' expected a {} prompt, got {} prompt '{}'",
                    step.command, step.expect, found.kind, found.prompt
                ),
                tail: diagnostic_tail(&found.raw),
            });
        }
        self.track(found.kind);

        if let Some(hit) = find_any(&found.output, &step.tolerate) {
            return Ok(Executed {
                status: StepStatus::Unchanged,
                message: Some(rejection_line(&found.output, hit)),
                output: found.output,
            });
        }

        if !step.require_any.is_empty() && find_any(&found.output, &step.require_any).is_none() {
            return Ok(Executed {
                status: StepStatus::Rejected,
                message: Some(format!("none of {:?} in output", step.require_any)),
                output: found.output,
            });
        }

        Ok(Executed {
            status: StepStatus::Applied,
            output: found.output,
            message: None,
        })
    }

    /// After an error match, read on to the next mode prompt.
    ///
    /// Returns the error text with the rest of its output, and the mode
    /// the CLI came back in.
    async fn settle(&mut self, error: &PromptMatch) -> Result<(String, PromptKind), SessionError> {
        let found = self
            .await_prompt(RESYNC_CANDIDATES, self.config.pty.settle_timeout)
            .await?;
        let text = format!("{}{}{}", error.output, error.prompt, found.output);
        Ok((text, found.kind))
    }

    async fn send(&mut self, line: &str, hidden: bool) -> Result<(), SessionError> {
        match self.channel.send_line(line, hidden).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.protocol(err)),
        }
    }

    async fn await_prompt(
        &mut self,
        candidates: &[PromptKind],
        timeout: Duration,
    ) -> Result<PromptMatch, SessionError> {
        match self
            .channel
            .await_one(&self.dialect.prompts, candidates, timeout, self.cancel)
            .await
        {
            Ok(found) => Ok(found),
            Err(err) => Err(self.protocol(err)),
        }
    }

    fn enable_secret(&self) -> Result<String, SessionError> {
        let credentials = &self.target.credentials;
        let secret = credentials
            .enable_password
            .as_ref()
            .unwrap_or(&credentials.password)
            .expose_secret();
        if secret.is_empty() {
            return Err(auth_failed("enable password required"));
        }
        Ok(secret.to_string())
    }

    fn track(&mut self, kind: PromptKind) {
        if let Some(next) = SessionState::for_prompt(kind) {
            self.transition(next);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("{}: {} -> {}", self.device, self.state, next);
            self.state = next;
        }
    }

    fn protocol(&self, err: ChannelError) -> SessionError {
        if matches!(err, ChannelError::Cancelled) {
            return SessionError::Cancelled;
        }
        let tail = match err.tail() {
            "" => self.channel.tail_text(),
            tail => tail.to_string(),
        };
        SessionError::Protocol {
            state: self.state.to_string(),
            detail: err.to_string(),
            tail,
        }
    }
}

fn auth_failed(detail: &str) -> SessionError {
    SessionError::AuthFailed {
        detail: detail.to_string(),
    }
}

fn find_any<'s>(text: &str, needles: &'s [String]) -> Option<&'s str> {
    needles
        .iter()
        .map(String::as_str)
        .find(|needle| text.contains(needle))
}

fn diagnostic_tail(text: &str) -> String {
    let mut start = text.len().saturating_sub(DIAGNOSTIC_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// The trimmed output line containing `needle`.
fn rejection_line(text: &str, needle: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| line.contains(needle))
        .unwrap_or(needle)
        .to_string()
}
