//! Transport layer: one pseudo-terminal backed connection per device.
//!
//! A [`Connector`] opens a [`Transport`] for a [`DeviceTarget`]. The session
//! state machine only ever talks to these two traits, so tests can swap in a
//! scripted fake device without touching the network.

pub mod config;
mod ssh;
mod telnet;

pub use config::{Credentials, DeviceTarget, DeviceTargetBuilder, HostKeyVerification, LineEnding, Protocol};
pub use ssh::SshTransport;
pub use telnet::{TelnetCodec, TelnetEvent, TelnetNegotiator, TelnetTransport};

use std::future::Future;
use std::time::Duration;

use crate::error::{ConnectError, TransportError};

/// A raw, half-duplex text channel to one device.
pub trait Transport: Send {
    /// Write raw bytes to the device.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read whatever arrives within `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time and
    /// `TransportError::Closed` once the remote end has gone away.
    fn read_available(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Tear the connection down.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Opens transports for device targets.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Connect (and, for SSH, authenticate) within `target.connect_timeout`.
    fn open(
        &self,
        target: &DeviceTarget,
    ) -> impl Future<Output = Result<Self::Transport, ConnectError>> + Send;
}

/// Connector for real devices, dispatching on [`DeviceTarget::protocol`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceConnector;

impl Connector for DeviceConnector {
    type Transport = DeviceTransport;

    async fn open(&self, target: &DeviceTarget) -> Result<DeviceTransport, ConnectError> {
        match target.protocol {
            Protocol::Ssh => SshTransport::connect(target).await.map(DeviceTransport::Ssh),
            Protocol::Telnet => TelnetTransport::connect(target)
                .await
                .map(DeviceTransport::Telnet),
        }
    }
}

/// Either an SSH or a Telnet session.
pub enum DeviceTransport {
    Ssh(SshTransport),
    Telnet(TelnetTransport),
}

impl Transport for DeviceTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Ssh(t) => t.send(data).await,
            Self::Telnet(t) => t.send(data).await,
        }
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Ssh(t) => t.read_available(timeout).await,
            Self::Telnet(t) => t.read_available(timeout).await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Ssh(t) => t.close().await,
            Self::Telnet(t) => t.close().await,
        }
    }
}
