//! Channel layer for prompt matching over a transport.
//!
//! This module handles the half-duplex conversation with the device CLI,
//! including tail-search prompt detection and escape sequence stripping.

mod buffer;
mod prompt;
mod pty;

pub use buffer::PatternBuffer;
pub use prompt::{Matcher, PromptHit, PromptKind, PromptPattern, PromptTable};
pub use pty::{DIAGNOSTIC_TAIL, PromptMatch, PtyChannel, PtyConfig};
