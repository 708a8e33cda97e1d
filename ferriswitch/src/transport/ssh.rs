//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;

use super::Transport;
use super::config::{DeviceTarget, HostKeyVerification};
use crate::error::{ConnectError, ConnectErrorKind, TransportError};

/// SSH session with an interactive PTY shell channel.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Shell channel with a PTY attached.
    channel: Channel<Msg>,

    open: bool,
}

impl SshTransport {
    /// Connect, authenticate and open a PTY shell.
    ///
    /// The TCP connect is done separately from the SSH handshake so socket
    /// failures (refused, unreachable) stay distinguishable from protocol
    /// failures (bad credentials).
    pub async fn connect(target: &DeviceTarget) -> Result<Self, ConnectError> {
        let address = target.socket_addr();
        let timeout = target.connect_timeout;
        let timed_out = || {
            ConnectError::new(
                ConnectErrorKind::Timeout,
                address.clone(),
                format!("no answer within {:?}", timeout),
            )
        };

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| ConnectError::from_io(address.clone(), &e))?;
        let _ = stream.set_nodelay(true);

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            host: target.host.clone(),
            port: target.port,
            host_key_verification: target.host_key_verification.clone(),
            known_hosts_path: target.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            timeout,
            client::connect_stream(ssh_config, stream, handler),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| {
            // check_server_key may have stored a more useful reason than
            // the generic russh::Error::UnknownKey
            let stored = host_key_error.lock().ok().and_then(|mut g| g.take());
            match stored {
                Some(detail) => ConnectError::new(ConnectErrorKind::AuthFailed, address.clone(), detail),
                None => ConnectError::new(ConnectErrorKind::Unreachable, address.clone(), e.to_string()),
            }
        })?;

        let authenticated = tokio::time::timeout(
            timeout,
            session.authenticate_password(
                target.credentials.username.as_str(),
                target.credentials.password.expose_secret(),
            ),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| ConnectError::new(ConnectErrorKind::Unreachable, address.clone(), e.to_string()))?
        .success();

        if !authenticated {
            return Err(ConnectError::new(
                ConnectErrorKind::AuthFailed,
                address.clone(),
                format!("credentials rejected for user '{}'", target.credentials.username),
            ));
        }

        let channel = tokio::time::timeout(
            timeout,
            Self::open_shell(&session, target.terminal_width, target.terminal_height),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| ConnectError::new(ConnectErrorKind::Unreachable, address.clone(), e.to_string()))?;

        debug!("ssh: shell open on {}", address);

        Ok(Self {
            session,
            channel,
            open: true,
        })
    }

    /// Open a session channel with a PTY and a shell.
    ///
    /// Line-mode switch CLIs stay silent on channels without a terminal, so
    /// the PTY request is not optional.
    async fn open_shell(
        session: &Handle<SshHandler>,
        width: u32,
        height: u32,
    ) -> Result<Channel<Msg>, russh::Error> {
        let channel = session.channel_open_session().await?;
        channel
            .request_pty(true, "xterm", width, height, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;
        Ok(channel)
    }
}

impl Transport for SshTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.channel.data(data).await?;
        Ok(())
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => return Ok(Vec::new()),
            };

            match msg {
                Some(ChannelMsg::Data { data }) => return Ok(data.to_vec()),
                // Some devices print errors on the stderr stream
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(data.to_vec()),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Err(TransportError::Closed);
                }
                Some(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let _ = self.channel.eof().await;
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    host_key_error: Arc<Mutex<Option<String>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err` with a description if the key changed or the file is unreadable.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> Result<bool, String> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(format!(
                "host key for {}:{} changed (known_hosts line {})",
                self.host, self.port, line
            )),
            Err(e) => Err(format!("known_hosts error: {}", e)),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> Result<(), russh::keys::Error> {
        if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        }
    }

    fn reject(&self, detail: String) -> Result<bool, russh::Error> {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(detail);
        }
        Ok(false)
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(detail) => self.reject(detail),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => self.reject(format!(
                    "host key for {}:{} is not in known_hosts",
                    self.host, self.port
                )),
                Err(detail) => self.reject(detail),
            },
        }
    }
}
