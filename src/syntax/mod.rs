//! Byte-pattern expression language: parsing, compilation and scanning.
//!
//! Signatures are written in a compact hex-based syntax: `504B0304` matches
//! four literal bytes, `??` any single byte, `*` any run of bytes,
//! `[41:5A]` a byte range, `{2-4}` a bounded gap, `(61|62)` alternatives and
//! `'text'` a Latin-1 string. An expression is parsed into an AST
//! ([`Node`]), then compiled ([`compile_expression`]) into a
//! [`CompiledSignature`]: one or more anchored subsequences that can be
//! scanned against raw bytes.

mod compiler;
mod matcher;
mod parser;
mod scan;

pub use compiler::{
    compile, compile_expression, Anchor, CompileError, CompileMode, CompiledSignature, Fragment,
    SubSequence,
};
pub use matcher::{ByteMatcher, SequenceMatcher};
pub use parser::parse;

use thiserror::Error;

/// One node of a parsed byte-pattern expression.
///
/// The parser produces a single [`Node::Sequence`] holding the ordered token
/// list; [`Node::ByteSet`] never comes from the parser - the compiler
/// produces it when collapsing single-byte alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A single byte value, optionally inverted (`41`, `[41]`, `[!41]`).
    Byte { value: u8, inverted: bool },
    /// An inclusive byte range, optionally inverted (`[41:5A]`, `[!41:5A]`).
    /// Endpoints may be declared high-to-low.
    Range { from: u8, to: u8, inverted: bool },
    /// Any single byte (`??`).
    Any,
    /// A literal byte string (`'text'`, Latin-1).
    String(Vec<u8>),
    /// Ordered alternatives (`(a|b)`); each child is a single node or a
    /// `Sequence`.
    Alternatives(Vec<Node>),
    /// An ordered list of nodes.
    Sequence(Vec<Node>),
    /// Exactly n unconstrained bytes (`{n}`).
    Repeat(u32),
    /// Between n and m unconstrained bytes (`{n-m}`).
    RepeatMinToMax(u32, u32),
    /// At least n unconstrained bytes, unbounded (`{n-*}`).
    RepeatMinToMany(u32),
    /// Zero or more unconstrained bytes (`*`); a subsequence boundary.
    ZeroToMany,
    /// A set of byte values matched at one position (compiler-generated).
    ByteSet(Vec<u8>),
}

impl Node {
    /// Short name used in compile error messages.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Node::Byte { .. } => "byte",
            Node::Range { .. } => "range",
            Node::Any => "any",
            Node::String(_) => "string",
            Node::Alternatives(_) => "alternatives",
            Node::Sequence(_) => "sequence",
            Node::Repeat(_) => "repeat",
            Node::RepeatMinToMax(_, _) => "repeat-min-to-max",
            Node::RepeatMinToMany(_) => "repeat-min-to-many",
            Node::ZeroToMany => "zero-to-many",
            Node::ByteSet(_) => "byte-set",
        }
    }
}

/// A syntax error in a byte-pattern expression.
///
/// Every variant names the character position where parsing stopped and
/// carries the full expression for context. Fatal to that one expression's
/// parse; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("invalid character {found:?} at position {position} in {expression:?}")]
    InvalidCharacter {
        found: char,
        position: usize,
        expression: String,
    },

    #[error("invalid hex digit {found:?} at position {position} in {expression:?}")]
    InvalidHexDigit {
        found: char,
        position: usize,
        expression: String,
    },

    #[error("? not followed by another ? at position {position} in {expression:?}")]
    LoneQuestionMark { position: usize, expression: String },

    #[error("unexpected end of expression at position {position} in {expression:?}")]
    UnexpectedEnd { position: usize, expression: String },

    #[error("invalid {{n-m}} gap syntax at position {position} in {expression:?}")]
    InvalidGap { position: usize, expression: String },

    #[error("invalid [] byte set syntax at position {position} in {expression:?}")]
    InvalidByteSet { position: usize, expression: String },

    #[error("no sequence defined before | or ) at position {position} in {expression:?}")]
    EmptyAlternative { position: usize, expression: String },

    #[error("unterminated (a|b) alternatives at position {position} in {expression:?}")]
    UnterminatedAlternatives { position: usize, expression: String },

    #[error("unterminated string at position {position} in {expression:?}")]
    UnterminatedString { position: usize, expression: String },

    #[error("empty string at position {position} in {expression:?}")]
    EmptyString { position: usize, expression: String },

    #[error("non Latin-1 character {found:?} in string at position {position} in {expression:?}")]
    NonLatin1String {
        found: char,
        position: usize,
        expression: String,
    },
}
