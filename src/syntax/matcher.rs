//! Compiled position matchers.
//!
//! A [`SequenceMatcher`] is a fixed-width run of single-byte matchers.
//! Fully literal runs keep a byte vector alongside so anchor searches can
//! use SIMD-accelerated `memchr::memmem` instead of a positionwise scan.

use memchr::memmem;

/// Matches one byte position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteMatcher {
    /// Exactly this byte.
    Literal(u8),
    /// Any byte except this one.
    Inverted(u8),
    /// Any byte in the inclusive range (normalized, `from <= to`).
    Range { from: u8, to: u8 },
    /// Any byte outside the inclusive range.
    InvertedRange { from: u8, to: u8 },
    /// Any byte from a small explicit set.
    Set(Vec<u8>),
    /// Any byte at all.
    Any,
}

impl ByteMatcher {
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            ByteMatcher::Literal(value) => byte == *value,
            ByteMatcher::Inverted(value) => byte != *value,
            ByteMatcher::Range { from, to } => (*from..=*to).contains(&byte),
            ByteMatcher::InvertedRange { from, to } => !(*from..=*to).contains(&byte),
            ByteMatcher::Set(values) => values.contains(&byte),
            ByteMatcher::Any => true,
        }
    }
}

/// A fixed-width sequence of byte matchers, one per position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceMatcher {
    matchers: Vec<ByteMatcher>,
    /// Set when every position is a `Literal`; enables memmem search.
    literal: Option<Vec<u8>>,
}

impl SequenceMatcher {
    pub fn new(matchers: Vec<ByteMatcher>) -> Self {
        let literal = matchers
            .iter()
            .map(|m| match m {
                ByteMatcher::Literal(value) => Some(*value),
                _ => None,
            })
            .collect::<Option<Vec<u8>>>();
        Self { matchers, literal }
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// The literal byte run, if every position is a literal.
    pub fn as_literal(&self) -> Option<&[u8]> {
        self.literal.as_deref()
    }

    /// Whether the whole sequence matches `data` starting at `pos`.
    pub fn matches_at(&self, data: &[u8], pos: usize) -> bool {
        let Some(window) = data.get(pos..pos + self.len()) else {
            return false;
        };
        self.matchers
            .iter()
            .zip(window)
            .all(|(matcher, byte)| matcher.matches(*byte))
    }

    /// Finds the first position `>= from` where the sequence matches.
    pub fn find_forward(&self, data: &[u8], from: usize) -> Option<usize> {
        if self.is_empty() || from + self.len() > data.len() {
            return None;
        }
        if let Some(literal) = &self.literal {
            return memmem::find(&data[from..], literal).map(|pos| pos + from);
        }
        (from..=data.len() - self.len()).find(|&pos| self.matches_at(data, pos))
    }

    /// Finds the last position `<= last_start` where the sequence matches.
    pub fn find_backward(&self, data: &[u8], last_start: usize) -> Option<usize> {
        if self.is_empty() || self.len() > data.len() {
            return None;
        }
        let last_start = last_start.min(data.len() - self.len());
        if let Some(literal) = &self.literal {
            return memmem::rfind(&data[..last_start + self.len()], literal);
        }
        (0..=last_start).rev().find(|&pos| self.matches_at(data, pos))
    }
}
