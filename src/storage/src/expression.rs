// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A minimal tokenizer for condition, key-condition, filter, and update
//! expressions.
//!
//! This is deliberately not a full expression parser: the rewriter only needs
//! to locate attribute references and the value placeholders adjacent to
//! them, and the in-memory store only evaluates the small expression subset
//! the engine itself emits.

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// A `#name` expression-attribute-name placeholder, without the `#`.
    Name(String),
    /// A `:value` expression-attribute-value placeholder, without the `:`.
    Value(String),
    /// A bare identifier: an attribute name, document path, function name, or
    /// keyword such as `AND` / `SET`.
    Ident(String),
    /// A comparator or other operator: `=`, `<>`, `<`, `<=`, `>`, `>=`, `+`,
    /// `-`.
    Op(String),
    LParen,
    RParen,
    Comma,
}

/// A token plus its byte span in the source expression, so rewrites can
/// splice replacement text without disturbing the caller's formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

fn is_ident_char(c: char) -> bool {
    // `.` keeps document paths like `a.b` in one token.
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

pub(crate) fn tokenize(expr: &str) -> StorageResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            ',' => {
                tokens.push(Token {
                    kind: TokenKind::Comma,
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            '#' | ':' => {
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                if i == start + 1 {
                    return Err(StorageError::invalid_argument(format!(
                        "dangling `{}` in expression `{}`",
                        c, expr
                    )));
                }
                let body = expr[start + 1..i].to_owned();
                let kind = if c == '#' {
                    TokenKind::Name(body)
                } else {
                    TokenKind::Value(body)
                };
                tokens.push(Token {
                    kind,
                    start,
                    end: i,
                });
            }
            '<' | '>' => {
                let start = i;
                i += 1;
                if i < bytes.len() && (bytes[i] == b'=' || (c == '<' && bytes[i] == b'>')) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Op(expr[start..i].to_owned()),
                    start,
                    end: i,
                });
            }
            '=' | '+' | '-' => {
                tokens.push(Token {
                    kind: TokenKind::Op(c.to_string()),
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            _ if is_ident_char(c) => {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(expr[start..i].to_owned()),
                    start,
                    end: i,
                });
            }
            _ => {
                return Err(StorageError::invalid_argument(format!(
                    "unexpected character `{}` in expression `{}`",
                    c, expr
                )));
            }
        }
    }
    Ok(tokens)
}

/// Applies `(start, end, replacement)` splices to `expr`. Spans must not
/// overlap.
pub(crate) fn splice(expr: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(start, _, _)| *start);
    let mut out = String::with_capacity(expr.len());
    let mut pos = 0;
    for (start, end, replacement) in edits {
        out.push_str(&expr[pos..start]);
        out.push_str(&replacement);
        pos = end;
    }
    out.push_str(&expr[pos..]);
    out
}
