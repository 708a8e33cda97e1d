//! Telnet transport with just enough option negotiation to get a terminal.
//!
//! Telnet has no PTY request; the remote side allocates a terminal once the
//! client agrees to send a terminal type and window size (NAWS). Every other
//! option is refused.
//!
//! [`TelnetCodec`] splits the byte stream into payload and negotiation
//! events, [`TelnetNegotiator`] decides the answers, and
//! [`TelnetTransport`] drives both over a [`Framed`] stream.

use std::collections::HashSet;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::Transport;
use super::config::DeviceTarget;
use crate::error::{ConnectError, ConnectErrorKind, TransportError};

/// Telnet protocol bytes (RFC 854, 1073, 1091).
pub mod consts {
    pub const IAC: u8 = 255;
    pub const DONT: u8 = 254;
    pub const DO: u8 = 253;
    pub const WONT: u8 = 252;
    pub const WILL: u8 = 251;
    pub const SB: u8 = 250;
    pub const SE: u8 = 240;

    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const TTYPE: u8 = 24;
    pub const NAWS: u8 = 31;

    pub const TTYPE_IS: u8 = 0;
    pub const TTYPE_SEND: u8 = 1;
}

use consts::*;

/// One unit of the Telnet stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Payload, with IAC escaping removed.
    Data(Bytes),
    /// DO, DONT, WILL or WONT for one option.
    Negotiate { verb: u8, option: u8 },
    /// A complete `IAC SB option ... IAC SE` block.
    Subnegotiate { option: u8, args: Bytes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Data,
    Command,
    Negotiate(u8),
    Subnegotiate,
    SubnegotiateIac,
}

/// Codec separating payload from negotiation.
///
/// Sequences split across reads are carried over in the decoder state, so
/// the codec can sit behind any [`Framed`] stream.
#[derive(Debug)]
pub struct TelnetCodec {
    state: DecoderState,
    sub_buffer: BytesMut,
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self {
            state: DecoderState::Data,
            sub_buffer: BytesMut::new(),
        }
    }
}

impl TelnetCodec {
    fn take_subnegotiation(&mut self) -> Option<TelnetEvent> {
        let mut block = self.sub_buffer.split();
        if block.is_empty() {
            return None;
        }
        let option = block.get_u8();
        Some(TelnetEvent::Subnegotiate {
            option,
            args: block.freeze(),
        })
    }
}

fn escape(input: &[u8], dst: &mut BytesMut) {
    dst.reserve(input.len() + 2);
    for chunk in input.split_inclusive(|b| *b == IAC) {
        dst.extend_from_slice(chunk);
        if chunk.last() == Some(&IAC) {
            dst.put_u8(IAC);
        }
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, TransportError> {
        while !src.is_empty() {
            if self.state == DecoderState::Data {
                match memchr::memchr(IAC, src) {
                    Some(0) => {
                        src.advance(1);
                        self.state = DecoderState::Command;
                        continue;
                    }
                    Some(end) => return Ok(Some(TelnetEvent::Data(src.split_to(end).freeze()))),
                    None => return Ok(Some(TelnetEvent::Data(src.split().freeze()))),
                }
            }

            let byte = src.get_u8();
            let (next, event) = match (self.state, byte) {
                (DecoderState::Command, IAC) => (
                    DecoderState::Data,
                    Some(TelnetEvent::Data(Bytes::from_static(&[IAC]))),
                ),
                (DecoderState::Command, DO | DONT | WILL | WONT) => {
                    (DecoderState::Negotiate(byte), None)
                }
                (DecoderState::Command, SB) => (DecoderState::Subnegotiate, None),
                (DecoderState::Negotiate(verb), option) => (
                    DecoderState::Data,
                    Some(TelnetEvent::Negotiate { verb, option }),
                ),
                (DecoderState::Subnegotiate, IAC) => (DecoderState::SubnegotiateIac, None),
                (DecoderState::Subnegotiate, b) => {
                    self.sub_buffer.put_u8(b);
                    (DecoderState::Subnegotiate, None)
                }
                (DecoderState::SubnegotiateIac, IAC) => {
                    self.sub_buffer.put_u8(IAC);
                    (DecoderState::Subnegotiate, None)
                }
                (DecoderState::SubnegotiateIac, SE) => {
                    (DecoderState::Data, self.take_subnegotiation())
                }
                (DecoderState::SubnegotiateIac, _) => {
                    self.sub_buffer.clear();
                    (DecoderState::Data, None)
                }
                // NOP, GA, DM and friends carry nothing for a line-mode CLI
                (DecoderState::Command | DecoderState::Data, _) => (DecoderState::Data, None),
            };
            self.state = next;
            if event.is_some() {
                return Ok(event);
            }
        }
        Ok(None)
    }
}

impl Encoder<TelnetEvent> for TelnetCodec {
    type Error = TransportError;

    fn encode(&mut self, item: TelnetEvent, dst: &mut BytesMut) -> Result<(), TransportError> {
        match item {
            TelnetEvent::Data(data) => escape(&data, dst),
            TelnetEvent::Negotiate { verb, option } => dst.extend_from_slice(&[IAC, verb, option]),
            TelnetEvent::Subnegotiate { option, args } => {
                dst.extend_from_slice(&[IAC, SB, option]);
                escape(&args, dst);
                dst.extend_from_slice(&[IAC, SE]);
            }
        }
        Ok(())
    }
}

/// Client-side option policy: agree to a terminal, refuse the rest.
#[derive(Debug)]
pub struct TelnetNegotiator {
    answered: HashSet<(u8, u8)>,
    width: u16,
    height: u16,
    terminal_type: &'static str,
}

impl TelnetNegotiator {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            answered: HashSet::new(),
            width,
            height,
            terminal_type: "XTERM",
        }
    }

    /// Replies owed for one decoded event. Payload needs none.
    pub fn respond(&mut self, event: &TelnetEvent) -> Vec<TelnetEvent> {
        match event {
            TelnetEvent::Data(_) => Vec::new(),
            TelnetEvent::Negotiate { verb, option } => self.negotiate(*verb, *option),
            TelnetEvent::Subnegotiate { option, args } => self.subnegotiate(*option, args),
        }
    }

    fn negotiate(&mut self, verb: u8, option: u8) -> Vec<TelnetEvent> {
        let reply = match (verb, option) {
            (DO, TTYPE) | (DO, NAWS) | (DO, SGA) => WILL,
            (DO, _) => WONT,
            (WILL, ECHO) | (WILL, SGA) => DO,
            (WILL, _) => DONT,
            // DONT/WONT confirm a state we never asked for
            _ => return Vec::new(),
        };

        if !self.answered.insert((verb, option)) {
            return Vec::new();
        }
        trace!("telnet: {} {} -> {}", verb, option, reply);

        let mut replies = vec![TelnetEvent::Negotiate {
            verb: reply,
            option,
        }];
        if verb == DO && option == NAWS {
            replies.push(self.window_size());
        }
        replies
    }

    fn window_size(&self) -> TelnetEvent {
        let mut args = BytesMut::with_capacity(4);
        args.put_u16(self.width);
        args.put_u16(self.height);
        TelnetEvent::Subnegotiate {
            option: NAWS,
            args: args.freeze(),
        }
    }

    fn subnegotiate(&self, option: u8, args: &[u8]) -> Vec<TelnetEvent> {
        if option != TTYPE || args.first() != Some(&TTYPE_SEND) {
            return Vec::new();
        }
        let mut answer = BytesMut::with_capacity(self.terminal_type.len() + 1);
        answer.put_u8(TTYPE_IS);
        answer.extend_from_slice(self.terminal_type.as_bytes());
        vec![TelnetEvent::Subnegotiate {
            option: TTYPE,
            args: answer.freeze(),
        }]
    }
}

/// Telnet session to a device CLI.
pub struct TelnetTransport<S = TcpStream> {
    framed: Framed<S, TelnetCodec>,
    negotiator: TelnetNegotiator,
    open: bool,
}

impl TelnetTransport<TcpStream> {
    /// Open a TCP connection to the target's Telnet port.
    pub async fn connect(target: &DeviceTarget) -> Result<Self, ConnectError> {
        let address = target.socket_addr();
        let stream = tokio::time::timeout(target.connect_timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| {
                ConnectError::new(
                    ConnectErrorKind::Timeout,
                    address.clone(),
                    format!("no answer within {:?}", target.connect_timeout),
                )
            })?
            .map_err(|e| ConnectError::from_io(address.clone(), &e))?;
        let _ = stream.set_nodelay(true);

        debug!("telnet: connected to {}", address);

        let width = u16::try_from(target.terminal_width).unwrap_or(u16::MAX);
        let height = u16::try_from(target.terminal_height).unwrap_or(u16::MAX);
        Ok(Self::from_stream(stream, width, height))
    }
}

impl<S> TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected byte stream.
    pub fn from_stream(stream: S, width: u16, height: u16) -> Self {
        Self {
            framed: Framed::new(stream, TelnetCodec::default()),
            negotiator: TelnetNegotiator::new(width, height),
            open: true,
        }
    }
}

impl<S> Transport for TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.framed
            .send(TelnetEvent::Data(Bytes::copy_from_slice(data)))
            .await
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(Some(event)) => event?,
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => return Ok(Vec::new()),
            };

            if let TelnetEvent::Data(data) = event {
                return Ok(data.to_vec());
            }

            // Negotiation carries no payload; answer it and keep reading
            let replies = self.negotiator.respond(&event);
            if !replies.is_empty() {
                for reply in replies {
                    self.framed.feed(reply).await?;
                }
                self.framed.flush().await?;
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.framed.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(codec: &mut TelnetCodec, input: &[u8]) -> Vec<TelnetEvent> {
        let mut src = BytesMut::from(input);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(&mut src).unwrap() {
            events.push(event);
        }
        assert!(src.is_empty());
        events
    }

    /// Run decoded events through the negotiator and encode the replies.
    fn answer(negotiator: &mut TelnetNegotiator, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut codec = TelnetCodec::default();
        let mut data = Vec::new();
        let mut wire = BytesMut::new();
        for event in decode(&mut codec, input) {
            if let TelnetEvent::Data(bytes) = &event {
                data.extend_from_slice(bytes);
            }
            for reply in negotiator.respond(&event) {
                codec.encode(reply, &mut wire).unwrap();
            }
        }
        (data, wire.to_vec())
    }

    #[test]
    fn test_plain_data_passes_through() {
        let mut codec = TelnetCodec::default();
        let events = decode(&mut codec, b"User Access Verification\r\nPassword: ");
        assert_eq!(
            events,
            vec![TelnetEvent::Data(Bytes::from_static(
                b"User Access Verification\r\nPassword: "
            ))]
        );
    }

    #[test]
    fn test_naws_and_refusals() {
        let mut negotiator = TelnetNegotiator::new(511, 24);
        let input = [IAC, DO, NAWS, IAC, DO, 39, IAC, WILL, ECHO, b'>'];
        let (data, replies) = answer(&mut negotiator, &input);

        assert_eq!(data, b">");
        let mut expected = vec![IAC, WILL, NAWS, IAC, SB, NAWS, 0x01, 0xFF, 0xFF, 0x00, 24, IAC, SE];
        expected.extend_from_slice(&[IAC, WONT, 39]);
        expected.extend_from_slice(&[IAC, DO, ECHO]);
        assert_eq!(replies, expected);
    }

    #[test]
    fn test_repeated_request_answered_once() {
        let mut negotiator = TelnetNegotiator::new(80, 24);
        let (_, first) = answer(&mut negotiator, &[IAC, WILL, SGA]);
        let (_, second) = answer(&mut negotiator, &[IAC, WILL, SGA]);
        assert_eq!(first, vec![IAC, DO, SGA]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_terminal_type_split_across_reads() {
        let mut codec = TelnetCodec::default();
        assert!(decode(&mut codec, &[IAC, SB, TTYPE]).is_empty());

        let events = decode(&mut codec, &[TTYPE_SEND, IAC, SE, b'#']);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Subnegotiate {
                    option: TTYPE,
                    args: Bytes::from_static(&[TTYPE_SEND]),
                },
                TelnetEvent::Data(Bytes::from_static(b"#")),
            ]
        );

        let mut negotiator = TelnetNegotiator::new(80, 24);
        let mut wire = BytesMut::new();
        for reply in negotiator.respond(&events[0]) {
            codec.encode(reply, &mut wire).unwrap();
        }
        let mut expected = vec![IAC, SB, TTYPE, TTYPE_IS];
        expected.extend_from_slice(b"XTERM");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(wire.to_vec(), expected);
    }

    #[test]
    fn test_escaped_iac_in_data() {
        let mut negotiator = TelnetNegotiator::new(80, 24);
        let (data, replies) = answer(&mut negotiator, &[b'a', IAC, IAC, b'b']);
        assert_eq!(data, vec![b'a', IAC, b'b']);
        assert!(replies.is_empty());

        let mut out = BytesMut::new();
        TelnetCodec::default()
            .encode(TelnetEvent::Data(Bytes::from_static(&[b'a', IAC, b'b'])), &mut out)
            .unwrap();
        assert_eq!(out.to_vec(), vec![b'a', IAC, IAC, b'b']);
    }

    #[tokio::test]
    async fn test_transport_answers_negotiation_and_returns_payload() {
        let mock = tokio_test::io::Builder::new()
            .read(&[IAC, WILL, ECHO, b'U', b's', b'e', b'r', b':', b' '])
            .write(&[IAC, DO, ECHO])
            .write(b"admin\r")
            .build();

        let mut transport = TelnetTransport::from_stream(mock, 80, 24);
        let data = transport
            .read_available(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(data, b"User: ");

        transport.send(b"admin\r").await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_hangup_is_closed() {
        let mock = tokio_test::io::Builder::new().read(b"Bye\r\n").build();

        let mut transport = TelnetTransport::from_stream(mock, 80, 24);
        let data = transport
            .read_available(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(data, b"Bye\r\n");
        assert!(matches!(
            transport.read_available(Duration::from_secs(1)).await,
            Err(TransportError::Closed)
        ));
    }
}
