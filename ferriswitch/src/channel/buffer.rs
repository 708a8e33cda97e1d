//! Pattern buffer with tail-search optimization.
//!
//! Only the last N bytes of the buffer are searched for prompt patterns,
//! rather than the entire output. Device output arrives in arbitrary
//! fragments, so the buffer is re-searched after every read.

use std::fmt;

use regex::bytes::Regex;
use vte::{Parser, Perform};

/// Collects printable output from the terminal parser, dropping escape
/// sequences (colors, cursor movement, title changes).
struct Printable<'a> {
    out: &'a mut Vec<u8>,
}

impl Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.out.push(byte);
        }
    }
}

/// Buffer for accumulating output and efficiently searching for patterns.
pub struct PatternBuffer {
    /// The accumulated, escape-free output.
    buffer: Vec<u8>,

    /// How many bytes from the end to search for patterns.
    search_depth: usize,

    /// Terminal parser; keeps state so escape sequences split across reads
    /// are still removed.
    parser: Parser,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
            parser: Parser::new(),
        }
    }

    /// Extend the buffer with new data, stripping ANSI escape codes.
    ///
    /// Returns the cleaned bytes that were appended.
    pub fn extend(&mut self, data: &[u8]) -> &[u8] {
        let start = self.buffer.len();
        let mut printable = Printable {
            out: &mut self.buffer,
        };
        self.parser.advance(&mut printable, data);
        &self.buffer[start..]
    }

    /// Offset where the searchable tail begins.
    pub fn tail_start(&self) -> usize {
        self.buffer.len().saturating_sub(self.search_depth)
    }

    /// The searchable tail of the buffer.
    pub fn tail(&self) -> &[u8] {
        &self.buffer[self.tail_start()..]
    }

    /// Search only the tail of the buffer for the pattern.
    ///
    /// Returns `(start, end)` offsets into the full buffer.
    pub fn search_tail(&self, pattern: &Regex) -> Option<(usize, usize)> {
        let offset = self.tail_start();
        pattern
            .find(&self.buffer[offset..])
            .map(|m| (offset + m.start(), offset + m.end()))
    }

    /// Search the entire buffer for a pattern.
    ///
    /// Use sparingly - prefer `search_tail` for prompt detection.
    pub fn search_full(&self, pattern: &Regex) -> Option<(usize, usize)> {
        pattern.find(&self.buffer).map(|m| (m.start(), m.end()))
    }

    /// Remove and return everything up to `end`.
    pub fn consume(&mut self, end: usize) -> Vec<u8> {
        let end = end.min(self.buffer.len());
        self.buffer.drain(..end).collect()
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// The last `n` bytes as text, for diagnostics.
    pub fn last_text(&self, n: usize) -> String {
        let start = self.buffer.len().saturating_sub(n);
        String::from_utf8_lossy(&self.buffer[start..]).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("search_depth", &self.search_depth)
            .finish()
    }
}
