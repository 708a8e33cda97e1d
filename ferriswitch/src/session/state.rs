//! Session states.

use std::fmt;

use crate::channel::PromptKind;
use crate::error::{ConnectErrorKind, SessionError};

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Connect(ConnectErrorKind),
    AuthFailed,
    ProtocolError,
    CommandRejected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(kind) => write!(f, "connect: {}", kind),
            Self::AuthFailed => f.write_str("authentication failed"),
            Self::ProtocolError => f.write_str("protocol error"),
            Self::CommandRejected => f.write_str("command rejected"),
        }
    }
}

/// Where the protocol state machine stands.
///
/// Initial state is `Connecting`; `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingLogin,
    AwaitingPassword,
    UserMode,
    PrivilegedMode,
    ConfigMode,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    /// State reached when `kind` is seen while waiting for a command.
    pub fn for_prompt(kind: PromptKind) -> Option<Self> {
        match kind {
            PromptKind::User => Some(Self::UserMode),
            PromptKind::Privileged => Some(Self::PrivilegedMode),
            PromptKind::Config => Some(Self::ConfigMode),
            _ => None,
        }
    }

    /// Terminal state for a session that ended with `err`.
    ///
    /// Cancellation is not a failure: the session is simply closed.
    pub fn after(err: &SessionError) -> Self {
        match err {
            SessionError::Connect(e) => Self::Failed(FailureReason::Connect(e.kind)),
            SessionError::AuthFailed { .. } => Self::Failed(FailureReason::AuthFailed),
            SessionError::Protocol { .. } | SessionError::DialectMismatch { .. } => {
                Self::Failed(FailureReason::ProtocolError)
            }
            SessionError::CommandRejected { .. } => Self::Failed(FailureReason::CommandRejected),
            SessionError::Cancelled => Self::Closed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::AwaitingLogin => f.write_str("awaiting login"),
            Self::AwaitingPassword => f.write_str("awaiting password"),
            Self::UserMode => f.write_str("user mode"),
            Self::PrivilegedMode => f.write_str("privileged mode"),
            Self::ConfigMode => f.write_str("config mode"),
            Self::Closed => f.write_str("closed"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}
