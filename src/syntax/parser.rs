//! Single-pass character-driven parser for the byte-pattern syntax.
//!
//! The dispatch is purely on the leading character of each token, with no
//! backtracking. Whitespace (space, tab, CR, LF) separates tokens and is
//! skipped; it is only needed by the container-signature dialect but is
//! accepted everywhere since the grammar stays unambiguous either way.

use super::{Node, SyntaxError};

/// Parses a byte-pattern expression into a single [`Node::Sequence`]
/// holding the ordered token list.
pub fn parse(expression: &str) -> Result<Node, SyntaxError> {
    let mut cursor = Cursor::new(expression);
    let mut nodes = Vec::new();
    while let Some(c) = cursor.next_char() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {}
            '*' => nodes.push(Node::ZeroToMany),
            '?' => {
                match cursor.next_char() {
                    Some('?') => nodes.push(Node::Any),
                    _ => return Err(cursor.lone_question_mark()),
                };
            }
            '0'..='9' | 'a'..='f' | 'A'..='F' => {
                let value = cursor.hex_pair(c)?;
                nodes.push(Node::Byte {
                    value,
                    inverted: false,
                });
            }
            '[' => nodes.push(cursor.parse_byte_set()?),
            '{' => nodes.push(cursor.parse_gap()?),
            '(' => nodes.push(cursor.parse_alternatives()?),
            '\'' => nodes.push(Node::String(cursor.parse_string()?)),
            other => return Err(cursor.invalid_character(other)),
        }
    }
    Ok(Node::Sequence(nodes))
}

/// Character cursor over an expression, tracking the position for errors.
struct Cursor<'a> {
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            chars: expression.chars().collect(),
            pos: 0,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&self) -> String {
        self.expression.to_string()
    }

    fn invalid_character(&self, found: char) -> SyntaxError {
        SyntaxError::InvalidCharacter {
            found,
            position: self.pos,
            expression: self.expression(),
        }
    }

    fn lone_question_mark(&self) -> SyntaxError {
        SyntaxError::LoneQuestionMark {
            position: self.pos,
            expression: self.expression(),
        }
    }

    fn unexpected_end(&self) -> SyntaxError {
        SyntaxError::UnexpectedEnd {
            position: self.pos,
            expression: self.expression(),
        }
    }

    /// Reads the second digit of a hex pair whose first digit was `first`.
    fn hex_pair(&mut self, first: char) -> Result<u8, SyntaxError> {
        let high = hex_value(first).ok_or_else(|| SyntaxError::InvalidHexDigit {
            found: first,
            position: self.pos,
            expression: self.expression(),
        })?;
        let second = self.next_char().ok_or_else(|| self.unexpected_end())?;
        let low = hex_value(second).ok_or_else(|| SyntaxError::InvalidHexDigit {
            found: second,
            position: self.pos,
            expression: self.expression(),
        })?;
        Ok((high << 4) | low)
    }

    /// Reads a full two-digit hex byte.
    fn hex_byte(&mut self) -> Result<u8, SyntaxError> {
        let first = self.next_char().ok_or_else(|| self.unexpected_end())?;
        self.hex_pair(first)
    }

    /// Reads an unsigned decimal integer (at least one digit).
    fn read_int(&mut self) -> Result<u32, SyntaxError> {
        let mut value: u32 = 0;
        let mut digits = 0;
        while let Some(c) = self.peek() {
            match c.to_digit(10) {
                Some(d) => {
                    self.pos += 1;
                    value = value.saturating_mul(10).saturating_add(d);
                    digits += 1;
                }
                None => break,
            }
        }
        if digits == 0 {
            return Err(SyntaxError::InvalidGap {
                position: self.pos,
                expression: self.expression(),
            });
        }
        Ok(value)
    }

    /// Parses `{n}`, `{n-m}` or `{n-*}` after the opening brace.
    fn parse_gap(&mut self) -> Result<Node, SyntaxError> {
        let min = self.read_int()?;
        match self.next_char() {
            Some('}') => return Ok(Node::Repeat(min)),
            Some('-') => {
                if self.peek() == Some('*') {
                    self.pos += 1; // consume the *
                    if self.next_char() == Some('}') {
                        return Ok(Node::RepeatMinToMany(min));
                    }
                } else {
                    let max = self.read_int()?;
                    if self.next_char() == Some('}') {
                        return Ok(Node::RepeatMinToMax(min, max));
                    }
                }
            }
            _ => {}
        }
        Err(SyntaxError::InvalidGap {
            position: self.pos,
            expression: self.expression(),
        })
    }

    /// Parses `[hh]`, `[!hh]`, `[hh:hh]` or `[!hh:hh]` after the opening
    /// bracket.
    fn parse_byte_set(&mut self) -> Result<Node, SyntaxError> {
        let inverted = if self.peek() == Some('!') {
            self.pos += 1;
            true
        } else {
            false
        };
        let first = self.hex_byte()?;
        match self.next_char() {
            Some(']') => return Ok(Node::Byte {
                value: first,
                inverted,
            }),
            Some(':') => {
                let second = self.hex_byte()?;
                if self.next_char() == Some(']') {
                    return Ok(Node::Range {
                        from: first,
                        to: second,
                        inverted,
                    });
                }
            }
            _ => {}
        }
        Err(SyntaxError::InvalidByteSet {
            position: self.pos,
            expression: self.expression(),
        })
    }

    /// Parses `(a|b|...)` after the opening parenthesis. Each alternative
    /// may contain hex bytes, byte sets and quoted strings only.
    fn parse_alternatives(&mut self) -> Result<Node, SyntaxError> {
        let mut alternatives: Vec<Node> = Vec::new();
        let mut sequence: Vec<Node> = Vec::new();
        while let Some(c) = self.next_char() {
            match c {
                ' ' | '\t' | '\n' | '\r' => {}
                ')' => {
                    if sequence.is_empty() {
                        return Err(SyntaxError::EmptyAlternative {
                            position: self.pos,
                            expression: self.expression(),
                        });
                    }
                    alternatives.push(alternative_node(std::mem::take(&mut sequence)));
                    // A group with one alternative collapses to it directly.
                    return Ok(if alternatives.len() == 1 {
                        alternatives.pop().expect("one alternative")
                    } else {
                        Node::Alternatives(alternatives)
                    });
                }
                '|' => {
                    if sequence.is_empty() {
                        return Err(SyntaxError::EmptyAlternative {
                            position: self.pos,
                            expression: self.expression(),
                        });
                    }
                    alternatives.push(alternative_node(std::mem::take(&mut sequence)));
                }
                '\'' => sequence.push(Node::String(self.parse_string()?)),
                '[' => sequence.push(self.parse_byte_set()?),
                '0'..='9' | 'a'..='f' | 'A'..='F' => {
                    let value = self.hex_pair(c)?;
                    sequence.push(Node::Byte {
                        value,
                        inverted: false,
                    });
                }
                other => return Err(self.invalid_character(other)),
            }
        }
        Err(SyntaxError::UnterminatedAlternatives {
            position: self.pos,
            expression: self.expression(),
        })
    }

    /// Parses `'text'` after the opening quote, with Latin-1 semantics:
    /// each character must fit in a single byte.
    fn parse_string(&mut self) -> Result<Vec<u8>, SyntaxError> {
        let mut bytes = Vec::new();
        loop {
            match self.next_char() {
                Some('\'') => break,
                Some(c) => {
                    let code = c as u32;
                    if code > 0xFF {
                        return Err(SyntaxError::NonLatin1String {
                            found: c,
                            position: self.pos,
                            expression: self.expression(),
                        });
                    }
                    bytes.push(code as u8);
                }
                None => {
                    return Err(SyntaxError::UnterminatedString {
                        position: self.pos,
                        expression: self.expression(),
                    })
                }
            }
        }
        if bytes.is_empty() {
            return Err(SyntaxError::EmptyString {
                position: self.pos,
                expression: self.expression(),
            });
        }
        Ok(bytes)
    }
}

/// A single-node alternative stays a bare node; longer ones wrap in a
/// sequence.
fn alternative_node(mut sequence: Vec<Node>) -> Node {
    if sequence.len() == 1 {
        sequence.pop().expect("one node")
    } else {
        Node::Sequence(sequence)
    }
}

fn hex_value(c: char) -> Option<u8> {
    c.to_digit(16).map(|d| d as u8)
}
