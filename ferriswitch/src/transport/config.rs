//! Device target configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. Factory-default switches regenerate
    /// their host key on every reset, so this is common in lab rollouts.
    Disabled,
}

/// Wire protocol used to reach the device CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Telnet,
}

impl Protocol {
    /// Well-known port for this protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Ssh => 22,
            Self::Telnet => 23,
        }
    }
}

/// Line terminator appended to every line sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Carriage return, what most switch CLIs expect over SSH.
    #[default]
    Cr,
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// Login credentials for a device.
pub struct Credentials {
    /// Username sent at SSH authentication or at an in-band login prompt.
    pub username: String,

    /// Login password.
    pub password: SecretString,

    /// Secret for privilege escalation; the login password is used when unset.
    pub enable_password: Option<SecretString>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "enable_password",
                &self.enable_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Destination of one session. Immutable for the session's lifetime.
#[derive(Debug)]
pub struct DeviceTarget {
    /// Target host (hostname or IP address).
    pub host: String,

    /// TCP port.
    pub port: u16,

    /// SSH or Telnet.
    pub protocol: Protocol,

    /// Authentication material.
    pub credentials: Credentials,

    /// Name of the CLI dialect spoken by the device.
    pub dialect: String,

    /// Line terminator for sent commands.
    pub line_ending: LineEnding,

    /// Bound on TCP connect plus protocol handshake.
    pub connect_timeout: Duration,

    /// Terminal width requested for the PTY.
    pub terminal_width: u32,

    /// Terminal height requested for the PTY.
    pub terminal_height: u32,

    /// Host key verification mode (SSH only).
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file (SSH only).
    pub known_hosts_path: Option<PathBuf>,
}

impl DeviceTarget {
    /// Start building a target for the specified host.
    pub fn builder(host: impl Into<String>) -> DeviceTargetBuilder {
        DeviceTargetBuilder::new(host)
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`DeviceTarget`].
///
/// # Example
///
/// ```rust
/// use ferriswitch::transport::{DeviceTarget, Protocol};
///
/// let target = DeviceTarget::builder("10.0.10.1")
///     .protocol(Protocol::Ssh)
///     .username("admin")
///     .password("secret")
///     .dialect("tplink_sg")
///     .build()
///     .unwrap();
/// assert_eq!(target.port, 22);
/// ```
pub struct DeviceTargetBuilder {
    host: String,
    port: Option<u16>,
    protocol: Protocol,
    username: Option<String>,
    password: Option<SecretString>,
    enable_password: Option<SecretString>,
    dialect: Option<String>,
    line_ending: LineEnding,
    connect_timeout: Duration,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
}

impl DeviceTargetBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            protocol: Protocol::Ssh,
            username: None,
            password: None,
            enable_password: None,
            dialect: None,
            line_ending: LineEnding::Cr,
            connect_timeout: Duration::from_secs(20),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Set the TCP port (default: 22 for SSH, 23 for Telnet).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn enable_password(mut self, password: impl Into<String>) -> Self {
        self.enable_password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the dialect name (e.g., "tplink_sg", "cisco_ios").
    pub fn dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    pub fn line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Build the target.
    ///
    /// SSH always needs a username; Telnet devices with password-only VTY
    /// lines may omit it.
    pub fn build(self) -> Result<DeviceTarget> {
        let dialect = self.dialect.ok_or_else(|| Error::InvalidTarget {
            message: "Dialect must be specified".to_string(),
        })?;

        let username = match (self.username, self.protocol) {
            (Some(username), _) => username,
            (None, Protocol::Telnet) => String::new(),
            (None, Protocol::Ssh) => {
                return Err(Error::InvalidTarget {
                    message: "Username is required for SSH".to_string(),
                });
            }
        };

        let password = self.password.ok_or_else(|| Error::InvalidTarget {
            message: "Password is required".to_string(),
        })?;

        Ok(DeviceTarget {
            port: self.port.unwrap_or(self.protocol.default_port()),
            host: self.host,
            protocol: self.protocol,
            credentials: Credentials {
                username,
                password,
                enable_password: self.enable_password,
            },
            dialect,
            line_ending: self.line_ending,
            connect_timeout: self.connect_timeout,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        })
    }
}
