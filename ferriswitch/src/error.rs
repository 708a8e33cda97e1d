//! Error types for ferriswitch.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for ferriswitch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure to establish a session with the device.
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Transport-level errors on an established session.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Prompt matching errors.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Terminal session failures.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Command plan construction errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Dialect table errors.
    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),

    /// Invalid device target configuration
    #[error("Invalid target: {message}")]
    InvalidTarget { message: String },
}

/// Why a connection could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// No route, unresolvable name, or host down.
    Unreachable,
    /// The remote port actively refused the connection.
    Refused,
    /// The device rejected the supplied credentials.
    AuthFailed,
    /// The connect or handshake did not finish in time.
    Timeout,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unreachable => "unreachable",
            Self::Refused => "refused",
            Self::AuthFailed => "authentication failed",
            Self::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Failure to open a transport session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{address} {kind}: {detail}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub address: String,
    pub detail: String,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, address: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            detail: detail.into(),
        }
    }

    /// Classify a socket-level error from a TCP connect attempt.
    pub fn from_io(address: impl Into<String>, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            io::ErrorKind::TimedOut => ConnectErrorKind::Timeout,
            _ => ConnectErrorKind::Unreachable,
        };
        Self::new(kind, address, err.to_string())
    }
}

/// Errors on an open transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote end closed the session
    #[error("Connection closed by remote")]
    Closed,

    /// The transport was already closed locally
    #[error("Transport not open")]
    NotOpen,
}

/// Prompt matching errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// None of the candidate prompts appeared in time
    #[error("Prompt not found within {waited:?}")]
    PromptTimeout { waited: Duration, tail: String },

    /// The remote end closed while a prompt was awaited
    #[error("Channel closed while awaiting prompt")]
    Closed { tail: String },

    /// The caller cancelled the session
    #[error("Cancelled")]
    Cancelled,

    /// Underlying transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ChannelError {
    /// Last bytes of output seen before the failure, if any.
    pub fn tail(&self) -> &str {
        match self {
            Self::PromptTimeout { tail, .. } | Self::Closed { tail } => tail,
            _ => "",
        }
    }
}

/// Terminal classification of a session, as reported in an `Outcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Network or transport setup failed
    #[error(transparent)]
    Connect(ConnectError),

    /// Credentials (login or enable) were rejected
    #[error("Authentication failed: {detail}")]
    AuthFailed { detail: String },

    /// The expected prompt never appeared, or an unexpected one did
    #[error("Protocol error while {state}: {detail}")]
    Protocol {
        state: String,
        detail: String,
        tail: String,
    },

    /// The device explicitly rejected a command
    #[error("Command '{command}' rejected: {message}")]
    CommandRejected { command: String, message: String },

    /// The target is tagged with a different dialect than the one supplied
    #[error("Target speaks '{target}' but dialect '{dialect}' was supplied")]
    DialectMismatch { target: String, dialect: String },

    /// The caller aborted the session
    #[error("Session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether this outcome should count as a failure for retry accounting.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<ConnectError> for SessionError {
    /// Rejected credentials are reported as [`SessionError::AuthFailed`] so
    /// callers can tell "fix the network" from "fix the credentials".
    fn from(err: ConnectError) -> Self {
        match err.kind {
            ConnectErrorKind::AuthFailed => Self::AuthFailed { detail: err.detail },
            _ => Self::Connect(err),
        }
    }
}

/// Errors raised while turning desired state into a command plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("VLAN {id}: id must be between 1 and 4094")]
    InvalidVlanId { id: u16 },

    #[error("VLAN {id}: duplicate id in desired state")]
    DuplicateVlan { id: u16 },

    #[error("VLAN {id}: name cannot be empty")]
    EmptyVlanName { id: u16 },

    #[error("LAG {id}: id must be between 1 and {max}")]
    InvalidLagId { id: u16, max: u16 },

    #[error("LAG {id}: at least 2 member ports are required")]
    LagTooSmall { id: u16 },

    #[error("LAG {id}: duplicate id in desired state")]
    DuplicateLag { id: u16 },

    #[error("Port {port}: port numbers start at 1")]
    InvalidPort { port: u16 },

    #[error("Port {port}: member of LAG {first} and LAG {second}")]
    LagMemberConflict { port: u16, first: u16, second: u16 },

    #[error("Port {port}: assigned more than one untagged VLAN ({first}, {second})")]
    ConflictingUntagged { port: u16, first: u16, second: u16 },

    #[error("Dialect '{dialect}' has no template for {operation}")]
    MissingTemplate { dialect: String, operation: String },

    #[error("Template '{template}' uses unknown placeholder {{{placeholder}}}")]
    UnboundPlaceholder { template: String, placeholder: String },

    #[error("Replace without observed state is not possible: {reason}")]
    ObservationRequired { reason: String },

    #[error("Replace would delete management VLAN {vlan}; confirmation required")]
    ManagementVlanAtRisk { vlan: u16 },

    #[error("Replace would reset port {port}, which may carry management VLAN {vlan}; confirmation required")]
    ManagementPortAtRisk { vlan: u16, port: u16 },

    #[error("VLAN {id}: reserved by the platform")]
    ReservedVlan { id: u16 },
}

/// Dialect table errors.
#[derive(Error, Debug)]
pub enum DialectError {
    /// A prompt pattern failed to compile
    #[error("Invalid {kind} pattern '{pattern}': {source}")]
    InvalidPattern {
        kind: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No dialect registered under this name
    #[error("Unknown dialect: {name}")]
    UnknownDialect { name: String },

    /// A dialect with this name is already registered
    #[error("Dialect already registered: {name}")]
    AlreadyRegistered { name: String },

    /// The table is missing a prompt kind the session needs
    #[error("Dialect '{dialect}' defines no {kind} prompt")]
    MissingPrompt { dialect: String, kind: String },
}

/// Result type alias using ferriswitch's Error.
pub type Result<T> = std::result::Result<T, Error>;
