//! PTY channel: a transport plus the pattern buffer it feeds.

use std::time::Duration;

use log::{debug, trace, warn};
use tokio_util::sync::CancellationToken;

use super::buffer::PatternBuffer;
use super::prompt::{PromptKind, PromptTable};
use crate::error::{ChannelError, TransportError};
use crate::transport::{LineEnding, Transport};

/// Bytes of output attached to protocol errors for diagnosis.
pub const DIAGNOSTIC_TAIL: usize = 256;

/// Configuration for PTY channel behavior.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Default wait for a prompt.
    pub timeout: Duration,

    /// Wait for the mode prompt that follows an error message.
    pub settle_timeout: Duration,

    /// Search depth for pattern matching.
    pub search_depth: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(5),
            search_depth: 1000,
        }
    }
}

/// Result of [`PtyChannel::await_one`].
#[derive(Debug, Clone)]
pub struct PromptMatch {
    /// Which kind of prompt appeared.
    pub kind: PromptKind,

    /// The matched prompt text, trimmed.
    pub prompt: String,

    /// Output between the command echo and the match.
    pub output: String,

    /// Everything consumed from the buffer, echo included.
    pub raw: String,

    /// Number of buffer bytes consumed.
    pub consumed: usize,
}

/// High-level channel for one interactive device session.
///
/// Strictly half-duplex: a line is sent, then output is read until one of
/// the candidate prompts shows up at the tail.
pub struct PtyChannel<T: Transport> {
    transport: Option<T>,
    config: PtyConfig,
    buffer: PatternBuffer,
    line_ending: LineEnding,

    /// Last line sent, used to skip its echo when matching.
    echo: Option<String>,

    /// Everything received, escape sequences removed.
    transcript: Vec<u8>,
}

impl<T: Transport> PtyChannel<T> {
    pub fn new(transport: T, config: PtyConfig, line_ending: LineEnding) -> Self {
        Self {
            transport: Some(transport),
            buffer: PatternBuffer::new(config.search_depth),
            config,
            line_ending,
            echo: None,
            transcript: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn config(&self) -> &PtyConfig {
        &self.config
    }

    /// Get the default timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn buffer(&self) -> &PatternBuffer {
        &self.buffer
    }

    /// Last bytes of unconsumed output, for diagnostics.
    pub fn tail_text(&self) -> String {
        self.buffer.last_text(DIAGNOSTIC_TAIL)
    }

    /// Everything received so far.
    pub fn transcript(&self) -> String {
        String::from_utf8_lossy(&self.transcript).into_owned()
    }

    /// Send one line. Hidden lines (secrets) are never logged and
    /// produce no echo to skip.
    pub async fn send_line(&mut self, line: &str, hidden: bool) -> Result<(), ChannelError> {
        let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;

        if !self.buffer.is_empty() {
            trace!("discarding {} stale bytes before send", self.buffer.len());
            self.buffer.clear();
        }

        if hidden {
            debug!("send: ********");
        } else {
            debug!("send: {:?}", line);
        }

        let mut data = String::with_capacity(line.len() + 2);
        data.push_str(line);
        data.push_str(self.line_ending.as_str());
        transport.send(data.as_bytes()).await?;

        self.echo = (!hidden && !line.trim().is_empty()).then(|| line.trim().to_string());
        Ok(())
    }

    /// Read until one of `candidates` appears, the timeout expires or the
    /// session is cancelled. Never retries; escalation is the caller's call.
    pub async fn await_one(
        &mut self,
        table: &PromptTable,
        candidates: &[PromptKind],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PromptMatch, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(found) = self.try_match(table, candidates) {
                trace!("matched {} prompt {:?}", found.kind, found.prompt);
                return Ok(found);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::PromptTimeout {
                    waited: timeout,
                    tail: self.tail_text(),
                });
            }

            let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                read = transport.read_available(remaining) => read,
            };

            match read {
                Ok(data) => {
                    if !data.is_empty() {
                        let cleaned = self.buffer.extend(&data);
                        self.transcript.extend_from_slice(cleaned);
                    }
                }
                Err(TransportError::Closed) => {
                    // The device may print its last words and hang up
                    if let Some(found) = self.try_match(table, candidates) {
                        return Ok(found);
                    }
                    return Err(ChannelError::Closed {
                        tail: self.tail_text(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drain output until the remote end hangs up or `timeout` passes.
    /// Used after a logout command, where no further prompt is expected.
    pub async fn await_close(&mut self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(transport) = self.transport.as_mut() else {
                return true;
            };
            if remaining.is_zero() {
                return false;
            }
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                read = transport.read_available(remaining) => read,
            };
            match read {
                Ok(data) => {
                    let cleaned = self.buffer.extend(&data);
                    self.transcript.extend_from_slice(cleaned);
                }
                Err(_) => return true,
            }
        }
    }

    /// Close the transport. Safe to call repeatedly; only the first call
    /// reaches the transport.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("error while closing transport: {}", e);
            }
        }
    }

    fn try_match(&mut self, table: &PromptTable, candidates: &[PromptKind]) -> Option<PromptMatch> {
        let data = self.buffer.as_slice();
        let skip = match self.echo.as_deref() {
            Some(echo) => match memchr::memchr(b'\n', data) {
                Some(nl) if String::from_utf8_lossy(&data[..nl]).contains(echo) => nl + 1,
                Some(_) => 0,
                // Echo still arriving: nothing past it to look at yet
                None if echo_in_progress(data, echo) => return None,
                None => 0,
            },
            None => 0,
        };

        let region_start = skip.max(self.buffer.tail_start());
        let hit = table.find(&data[region_start..], candidates)?;
        let start = region_start + hit.start;
        let end = region_start + hit.end;

        let output = String::from_utf8_lossy(&data[skip.min(start)..start]).into_owned();
        let prompt = String::from_utf8_lossy(&data[start..end]).trim().to_string();
        let raw = String::from_utf8_lossy(&self.buffer.consume(end)).into_owned();
        self.echo = None;

        Some(PromptMatch {
            kind: hit.kind,
            prompt,
            output,
            raw,
            consumed: end,
        })
    }
}

fn echo_in_progress(data: &[u8], echo: &str) -> bool {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    !text.is_empty() && (echo.starts_with(text) || text.contains(echo))
}

impl<T: Transport> Drop for PtyChannel<T> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            warn!("PtyChannel dropped without close()");
        }
    }
}
