//! Prompt patterns and precedence-ordered matching.

use std::fmt;

use memchr::memmem;
use regex::bytes::Regex;
use serde::Deserialize;

use crate::error::DialectError;

/// What a recognized piece of output means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Login,
    Password,
    User,
    Privileged,
    Config,
    /// Confirmation or pager prompts such as `[confirm]` or `(y/n)`.
    Continuation,
    /// Rejection or failure text printed by the device.
    Error,
}

impl PromptKind {
    /// Lower wins. Error text must beat mode prompts that share a suffix.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Login | Self::Password => 1,
            Self::User | Self::Privileged | Self::Config | Self::Continuation => 2,
        }
    }

    /// Prompts that mean the CLI is waiting for a command.
    pub fn is_mode(self) -> bool {
        matches!(self, Self::User | Self::Privileged | Self::Config)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Password => "password",
            Self::User => "user",
            Self::Privileged => "privileged",
            Self::Config => "config",
            Self::Continuation => "continuation",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a prompt is recognized.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Literal text at the very end of the output (trailing blanks allowed).
    Suffix(String),
    /// Literal text anywhere in the searched output.
    Contains(String),
    /// Regular expression; anchor with `$` to require end of output.
    Pattern(Regex),
}

impl Matcher {
    /// Returns `(start, end)` of the match within `region`.
    pub fn find(&self, region: &[u8]) -> Option<(usize, usize)> {
        match self {
            Self::Suffix(literal) => {
                let trimmed = trim_trailing_blanks(region);
                trimmed
                    .ends_with(literal.as_bytes())
                    .then(|| (trimmed.len() - literal.len(), region.len()))
            }
            Self::Contains(literal) => {
                memmem::find(region, literal.as_bytes()).map(|start| (start, start + literal.len()))
            }
            Self::Pattern(regex) => regex.find(region).map(|m| (m.start(), m.end())),
        }
    }
}

fn trim_trailing_blanks(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &data[..end]
}

/// A single recognizable prompt of a dialect.
#[derive(Debug, Clone)]
pub struct PromptPattern {
    pub kind: PromptKind,
    pub matcher: Matcher,

    /// Strings that must NOT be on the matched line.
    /// Used for disambiguation (e.g., "#" matches both privileged and config).
    pub not_contains: Vec<String>,
}

impl PromptPattern {
    pub fn suffix(kind: PromptKind, literal: impl Into<String>) -> Self {
        Self {
            kind,
            matcher: Matcher::Suffix(literal.into()),
            not_contains: vec![],
        }
    }

    pub fn contains(kind: PromptKind, literal: impl Into<String>) -> Self {
        Self {
            kind,
            matcher: Matcher::Contains(literal.into()),
            not_contains: vec![],
        }
    }

    pub fn regex(kind: PromptKind, pattern: &str) -> Result<Self, DialectError> {
        let regex = Regex::new(pattern).map_err(|source| DialectError::InvalidPattern {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            kind,
            matcher: Matcher::Pattern(regex),
            not_contains: vec![],
        })
    }

    /// Add a not_contains string.
    pub fn with_not_contains(mut self, text: impl Into<String>) -> Self {
        self.not_contains.push(text.into());
        self
    }

    /// Find this prompt in `region`, honoring `not_contains`.
    pub fn find(&self, region: &[u8]) -> Option<(usize, usize)> {
        let (start, end) = self.matcher.find(region)?;
        if !self.not_contains.is_empty() {
            let line_start = memchr::memrchr(b'\n', &region[..start]).map_or(0, |i| i + 1);
            let line = String::from_utf8_lossy(&region[line_start..end]);
            if self.not_contains.iter().any(|nc| line.contains(nc.as_str())) {
                return None;
            }
        }
        Some((start, end))
    }
}

/// A hit from [`PromptTable::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptHit {
    pub kind: PromptKind,
    pub start: usize,
    pub end: usize,
}

/// All prompts of one dialect, kept in precedence order.
#[derive(Debug, Clone, Default)]
pub struct PromptTable {
    patterns: Vec<PromptPattern>,
}

impl PromptTable {
    pub fn new(patterns: Vec<PromptPattern>) -> Self {
        let mut table = Self { patterns };
        table.sort();
        table
    }

    pub fn push(&mut self, pattern: PromptPattern) {
        self.patterns.push(pattern);
        self.sort();
    }

    // Stable: within one precedence class the declaration order wins
    fn sort(&mut self) {
        self.patterns.sort_by_key(|p| p.kind.precedence());
    }

    /// Whether any pattern of `kind` exists.
    pub fn has(&self, kind: PromptKind) -> bool {
        self.patterns.iter().any(|p| p.kind == kind)
    }

    pub fn patterns(&self) -> &[PromptPattern] {
        &self.patterns
    }

    /// First pattern among `candidates` that matches `region`.
    pub fn find(&self, region: &[u8], candidates: &[PromptKind]) -> Option<PromptHit> {
        self.patterns
            .iter()
            .filter(|p| candidates.contains(&p.kind))
            .find_map(|p| {
                p.find(region).map(|(start, end)| PromptHit {
                    kind: p.kind,
                    start,
                    end,
                })
            })
    }
}
