//! Compiles a parsed byte-pattern expression into an executable signature.
//!
//! Compilation runs in two phases. Phase one walks the token list in
//! anchor-dependent order (reversed for EOF-anchored signatures) and
//! normalizes wildcards: every `*` is relocated to sit directly after the
//! last value-bearing token, and `{n-*}` splits into a bounded `{n}` gap
//! plus a `*`. After that every `*` is an unambiguous subsequence boundary.
//! Phase two splits on those boundaries and builds one [`SubSequence`] per
//! span: the longest contiguous literal run becomes the anchor matcher and
//! everything on either side becomes gap-tagged fragments.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::matcher::{ByteMatcher, SequenceMatcher};
use super::parser::parse;
use super::{Node, SyntaxError};

/// The widest byte range allowed inside an anchoring sequence in
/// [`CompileMode::Extended`]. Wider ranges degrade anchor search badly and
/// are compiled as fragments instead.
const MAX_ANCHOR_RANGE: u32 = 64;

/// How a signature's offsets are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// Offsets measured from the beginning of the file; the first
    /// subsequence must sit inside its declared offset window.
    #[default]
    #[serde(rename = "bof")]
    BofOffset,
    /// BOF-relative but floating: the first subsequence may occur anywhere
    /// at or after its minimum offset.
    Variable,
    /// Offsets measured back from the end of the file.
    #[serde(rename = "eof")]
    EofOffset,
}

/// How strictly anchoring sequences are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// Only runs of single byte values may anchor a subsequence.
    Strict,
    /// Ranges up to [`MAX_ANCHOR_RANGE`] wide may join an anchor, and
    /// alternatives of single bytes collapse into a byte-set matcher.
    #[default]
    Extended,
}

/// A compile failure for one signature expression.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no suitable anchoring sequence found in {expression:?}")]
    NoAnchor { expression: String },

    #[error("unexpected {kind} node while compiling {expression:?}")]
    UnexpectedNode {
        kind: &'static str,
        expression: String,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

/// A secondary matcher tied to one side of an anchor, reachable only
/// within its gap window. The gap is measured from the nearest fixed
/// point: the anchor, or the previously matched fragment on that side.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub matcher: SequenceMatcher,
    pub min_gap: usize,
    pub max_gap: usize,
}

/// One anchored span of a signature.
///
/// Fragment positions are ordered outward from the anchor; each position
/// holds one or more OR-alternatives sharing a single gap window. The
/// offset bounds carry whatever gap was left over on the side that the
/// sequence placement consumes (left for BOF-relative, right for
/// EOF-relative signatures).
#[derive(Debug, Clone)]
pub struct SubSequence {
    pub anchor: SequenceMatcher,
    pub left_fragments: Vec<Vec<Fragment>>,
    pub right_fragments: Vec<Vec<Fragment>>,
    pub min_offset: usize,
    pub max_offset: usize,
}

/// A fully compiled signature: an anchor kind plus one or more
/// subsequences, every one of which must be placed for the signature to
/// match.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub anchor: Anchor,
    pub subsequences: Vec<SubSequence>,
}

/// Parses and compiles an expression in one step.
pub fn compile_expression(
    expression: &str,
    anchor: Anchor,
    mode: CompileMode,
) -> Result<CompiledSignature, CompileError> {
    let ast = parse(expression)?;
    compile_with_context(&ast, anchor, mode, expression)
}

/// Compiles an already-parsed AST.
pub fn compile(ast: &Node, anchor: Anchor, mode: CompileMode) -> Result<CompiledSignature, CompileError> {
    compile_with_context(ast, anchor, mode, "")
}

fn compile_with_context(
    ast: &Node,
    anchor: Anchor,
    mode: CompileMode,
    expression: &str,
) -> Result<CompiledSignature, CompileError> {
    let nodes: &[Node] = match ast {
        Node::Sequence(list) => list,
        single => std::slice::from_ref(single),
    };
    let anchored_to_end = anchor == Anchor::EofOffset;
    let normalized = preprocess(nodes, anchored_to_end, mode);

    let mut subsequences = Vec::new();
    let mut span_start = 0;
    for (index, node) in normalized.iter().enumerate() {
        if matches!(node, Node::ZeroToMany) {
            subsequences.push(build_subsequence(
                &normalized[span_start..index],
                anchored_to_end,
                mode,
                expression,
            )?);
            span_start = index + 1;
        }
    }
    if span_start < normalized.len() {
        subsequences.push(build_subsequence(
            &normalized[span_start..],
            anchored_to_end,
            mode,
            expression,
        )?);
    }

    if subsequences.is_empty() {
        return Err(CompileError::NoAnchor {
            expression: expression.to_string(),
        });
    }
    Ok(CompiledSignature {
        anchor,
        subsequences,
    })
}

/// Phase one: wildcard normalization, walked in anchor order.
///
/// Every relocation targets the slot just after the last value-bearing
/// token seen so far, so `*` never strands a gap token in the wrong
/// subsequence. EOF-anchored signatures walk in reverse and the result is
/// re-reversed to restore textual order.
fn preprocess(nodes: &[Node], anchored_to_end: bool, mode: CompileMode) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len() + 2);
    let mut last_value_pos: Option<usize> = None;

    let indices: Box<dyn Iterator<Item = usize>> = if anchored_to_end {
        Box::new((0..nodes.len()).rev())
    } else {
        Box::new(0..nodes.len())
    };

    for index in indices {
        let node = &nodes[index];
        match node {
            Node::Byte { .. } | Node::Range { .. } | Node::String(_) | Node::Any | Node::ByteSet(_) => {
                out.push(node.clone());
                last_value_pos = Some(out.len() - 1);
            }
            Node::Alternatives(alternatives) => {
                let pushed = if mode == CompileMode::Extended {
                    collapse_single_byte_alternatives(alternatives)
                        .unwrap_or_else(|| node.clone())
                } else {
                    node.clone()
                };
                out.push(pushed);
                last_value_pos = Some(out.len() - 1);
            }
            Node::ZeroToMany => {
                out.insert(insert_slot(last_value_pos), Node::ZeroToMany);
            }
            Node::RepeatMinToMany(min) => {
                // {n-*} is "at least n, then unbounded": a bounded gap in
                // this subsequence plus a boundary after the last value.
                out.insert(insert_slot(last_value_pos), Node::ZeroToMany);
                out.push(Node::Repeat(*min));
            }
            other => out.push(other.clone()),
        }
    }

    if anchored_to_end {
        out.reverse();
    }
    out
}

fn insert_slot(last_value_pos: Option<usize>) -> usize {
    last_value_pos.map_or(0, |pos| pos + 1)
}

/// Alternatives whose every branch is one plain byte collapse into a
/// byte-set matcher, which matches the same set in a single position.
fn collapse_single_byte_alternatives(alternatives: &[Node]) -> Option<Node> {
    let mut values = Vec::with_capacity(alternatives.len());
    for alternative in alternatives {
        match alternative {
            Node::Byte {
                value,
                inverted: false,
            } => values.push(*value),
            _ => return None,
        }
    }
    values.sort_unstable();
    values.dedup();
    Some(Node::ByteSet(values))
}

/// Phase two, per span: locate the anchor run, then walk outward building
/// fragments on each side.
fn build_subsequence(
    span: &[Node],
    anchored_to_end: bool,
    mode: CompileMode,
    expression: &str,
) -> Result<SubSequence, CompileError> {
    let (anchor_start, anchor_end) = locate_anchor_run(span, mode, expression)?;
    let anchor = compile_matcher(&span[anchor_start..=anchor_end], expression)?;

    let (left_fragments, left_offsets) = build_left_fragments(&span[..anchor_start], expression)?;
    let (right_fragments, right_offsets) =
        build_right_fragments(&span[anchor_end + 1..], expression)?;

    let (min_offset, max_offset) = if anchored_to_end {
        right_offsets
    } else {
        left_offsets
    };

    Ok(SubSequence {
        anchor,
        left_fragments,
        right_fragments,
        min_offset,
        max_offset,
    })
}

/// Finds the longest contiguous literal run in a span; ties keep the first
/// found. Bytes and strings always extend a run; ranges only in Extended
/// mode and only when narrow enough. Everything else breaks the run.
fn locate_anchor_run(
    span: &[Node],
    mode: CompileMode,
    expression: &str,
) -> Result<(usize, usize), CompileError> {
    let mut length = 0usize;
    let mut run_start = 0usize;
    let mut best_length = 0usize;
    let mut best_start = 0usize;
    let mut best_end = 0usize;

    for (index, node) in span.iter().enumerate() {
        let extends = match node {
            Node::Byte { .. } => Some(1),
            Node::String(bytes) => Some(bytes.len()),
            Node::Range { from, to, .. }
                if mode == CompileMode::Extended
                    && (*from).abs_diff(*to) as u32 <= MAX_ANCHOR_RANGE =>
            {
                Some(1)
            }
            _ => None,
        };
        match extends {
            Some(width) => length += width,
            None => {
                if length > best_length {
                    best_length = length;
                    best_start = run_start;
                    best_end = index - 1;
                }
                length = 0;
                run_start = index + 1;
            }
        }
    }
    if length > best_length {
        best_length = length;
        best_start = run_start;
        best_end = span.len() - 1;
    }

    if best_length == 0 {
        return Err(CompileError::NoAnchor {
            expression: expression.to_string(),
        });
    }
    Ok((best_start, best_end))
}

/// Walks leftward from the anchor, closing a fragment whenever a gap or
/// alternatives token interrupts the current value run. Gap widths
/// accumulate additively across consecutive gap tokens. Returns the
/// fragment positions (nearest the anchor first) and any leftover gap at
/// the far end of the walk.
fn build_left_fragments(
    nodes: &[Node],
    expression: &str,
) -> Result<(Vec<Vec<Fragment>>, (usize, usize)), CompileError> {
    let mut fragments: Vec<Vec<Fragment>> = Vec::new();
    let mut min_gap = 0usize;
    let mut max_gap = 0usize;
    let mut run: Option<(usize, usize)> = None; // (start, end) inclusive

    for index in (0..nodes.len()).rev() {
        match &nodes[index] {
            Node::Byte { .. } | Node::Any | Node::Range { .. } | Node::String(_) | Node::ByteSet(_) => {
                let end = run.map_or(index, |(_, end)| end);
                run = Some((index, end));
            }
            gap @ (Node::Repeat(_) | Node::RepeatMinToMax(_, _)) => {
                if let Some((start, end)) = run.take() {
                    fragments.push(vec![Fragment {
                        matcher: compile_matcher(&nodes[start..=end], expression)?,
                        min_gap,
                        max_gap,
                    }]);
                    min_gap = 0;
                    max_gap = 0;
                }
                let (gap_min, gap_max) = gap_bounds(gap);
                min_gap += gap_min;
                max_gap += gap_max;
            }
            Node::Alternatives(alternatives) => {
                if let Some((start, end)) = run.take() {
                    fragments.push(vec![Fragment {
                        matcher: compile_matcher(&nodes[start..=end], expression)?,
                        min_gap,
                        max_gap,
                    }]);
                    min_gap = 0;
                    max_gap = 0;
                }
                fragments.push(compile_alternatives(alternatives, min_gap, max_gap, expression)?);
                min_gap = 0;
                max_gap = 0;
            }
            other => {
                return Err(CompileError::UnexpectedNode {
                    kind: other.kind(),
                    expression: expression.to_string(),
                })
            }
        }
    }

    if let Some((start, end)) = run {
        fragments.push(vec![Fragment {
            matcher: compile_matcher(&nodes[start..=end], expression)?,
            min_gap,
            max_gap,
        }]);
        min_gap = 0;
        max_gap = 0;
    }

    Ok((fragments, (min_gap, max_gap)))
}

/// Mirror of [`build_left_fragments`], walking rightward from the anchor.
fn build_right_fragments(
    nodes: &[Node],
    expression: &str,
) -> Result<(Vec<Vec<Fragment>>, (usize, usize)), CompileError> {
    let mut fragments: Vec<Vec<Fragment>> = Vec::new();
    let mut min_gap = 0usize;
    let mut max_gap = 0usize;
    let mut run: Option<(usize, usize)> = None;

    for (index, node) in nodes.iter().enumerate() {
        match node {
            Node::Byte { .. } | Node::Any | Node::Range { .. } | Node::String(_) | Node::ByteSet(_) => {
                let start = run.map_or(index, |(start, _)| start);
                run = Some((start, index));
            }
            gap @ (Node::Repeat(_) | Node::RepeatMinToMax(_, _)) => {
                if let Some((start, end)) = run.take() {
                    fragments.push(vec![Fragment {
                        matcher: compile_matcher(&nodes[start..=end], expression)?,
                        min_gap,
                        max_gap,
                    }]);
                    min_gap = 0;
                    max_gap = 0;
                }
                let (gap_min, gap_max) = gap_bounds(gap);
                min_gap += gap_min;
                max_gap += gap_max;
            }
            Node::Alternatives(alternatives) => {
                if let Some((start, end)) = run.take() {
                    fragments.push(vec![Fragment {
                        matcher: compile_matcher(&nodes[start..=end], expression)?,
                        min_gap,
                        max_gap,
                    }]);
                    min_gap = 0;
                    max_gap = 0;
                }
                fragments.push(compile_alternatives(alternatives, min_gap, max_gap, expression)?);
                min_gap = 0;
                max_gap = 0;
            }
            other => {
                return Err(CompileError::UnexpectedNode {
                    kind: other.kind(),
                    expression: expression.to_string(),
                })
            }
        }
    }

    if let Some((start, end)) = run {
        fragments.push(vec![Fragment {
            matcher: compile_matcher(&nodes[start..=end], expression)?,
            min_gap,
            max_gap,
        }]);
        min_gap = 0;
        max_gap = 0;
    }

    Ok((fragments, (min_gap, max_gap)))
}

/// `{n}` is exactly n bytes; `{n-m}` between n and m.
fn gap_bounds(node: &Node) -> (usize, usize) {
    match node {
        Node::Repeat(n) => (*n as usize, *n as usize),
        Node::RepeatMinToMax(min, max) => (*min as usize, *max as usize),
        _ => (0, 0),
    }
}

/// Every branch of an alternatives group becomes one fragment; all share
/// the same gap window.
fn compile_alternatives(
    alternatives: &[Node],
    min_gap: usize,
    max_gap: usize,
    expression: &str,
) -> Result<Vec<Fragment>, CompileError> {
    let mut fragments = Vec::with_capacity(alternatives.len());
    for alternative in alternatives {
        let nodes: &[Node] = match alternative {
            Node::Sequence(list) => list,
            single => std::slice::from_ref(single),
        };
        fragments.push(Fragment {
            matcher: compile_matcher(nodes, expression)?,
            min_gap,
            max_gap,
        });
    }
    Ok(fragments)
}

/// Compiles a run of value-bearing nodes into a fixed-width matcher.
fn compile_matcher(nodes: &[Node], expression: &str) -> Result<SequenceMatcher, CompileError> {
    let mut matchers = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Byte { value, inverted } => matchers.push(if *inverted {
                ByteMatcher::Inverted(*value)
            } else {
                ByteMatcher::Literal(*value)
            }),
            Node::Range { from, to, inverted } => {
                let (low, high) = if from <= to { (*from, *to) } else { (*to, *from) };
                matchers.push(if *inverted {
                    ByteMatcher::InvertedRange { from: low, to: high }
                } else {
                    ByteMatcher::Range { from: low, to: high }
                });
            }
            Node::Any => matchers.push(ByteMatcher::Any),
            Node::String(bytes) => {
                matchers.extend(bytes.iter().map(|b| ByteMatcher::Literal(*b)));
            }
            Node::ByteSet(values) => matchers.push(ByteMatcher::Set(values.clone())),
            other => {
                return Err(CompileError::UnexpectedNode {
                    kind: other.kind(),
                    expression: expression.to_string(),
                })
            }
        }
    }
    Ok(SequenceMatcher::new(matchers))
}
