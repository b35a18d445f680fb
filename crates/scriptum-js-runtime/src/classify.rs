//! Lexical source classification.
//!
//! A small JavaScript tokenizer used for two things: scanning source for
//! top-level entry candidates, and feeding the formatted-view span merge
//! with classified regions. Whitespace is deliberately not covered, so
//! consumers see gaps between spans and render them as unclassified.
//!
//! This is a lexical approximation, not a parser: template literals are
//! one string span (interpolations included) and `/` is always an
//! operator, never a regex literal.

use serde::{Deserialize, Serialize};

/// Classification of one source region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Keyword,
    Identifier,
    Number,
    String,
    Comment,
    Operator,
}

/// A classified half-open byte range `[start, end)` of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSpan {
    pub start: usize,
    pub end: usize,
    pub class: TokenClass,
}

const KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "default", "delete",
    "do", "else", "export", "extends", "false", "finally", "for", "function", "get", "if",
    "import", "in", "instanceof", "let", "new", "null", "of", "return", "set", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "yield",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize `code` into classified spans, in source order.
pub fn classify(code: &str) -> Vec<ClassifiedSpan> {
    let mut spans = Vec::new();
    let mut chars = code.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }

        // Comments.
        if c == '/' {
            match chars.peek() {
                Some((_, '/')) => {
                    let mut end = code.len();
                    for (idx, lc) in chars.by_ref() {
                        if lc == '\n' {
                            end = idx;
                            break;
                        }
                    }
                    spans.push(ClassifiedSpan {
                        start,
                        end,
                        class: TokenClass::Comment,
                    });
                    continue;
                }
                Some((_, '*')) => {
                    chars.next();
                    let mut end = code.len();
                    let mut prev = '\0';
                    for (idx, bc) in chars.by_ref() {
                        if prev == '*' && bc == '/' {
                            end = idx + 1;
                            break;
                        }
                        prev = bc;
                    }
                    spans.push(ClassifiedSpan {
                        start,
                        end,
                        class: TokenClass::Comment,
                    });
                    continue;
                }
                _ => {}
            }
        }

        // Strings (single, double, template).
        if c == '"' || c == '\'' || c == '`' {
            let quote = c;
            let mut end = code.len();
            let mut escaped = false;
            for (idx, sc) in chars.by_ref() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match sc {
                    '\\' => escaped = true,
                    _ if sc == quote => {
                        end = idx + 1;
                        break;
                    }
                    // Plain strings do not span lines; templates do.
                    '\n' if quote != '`' => {
                        end = idx;
                        break;
                    }
                    _ => {}
                }
            }
            spans.push(ClassifiedSpan {
                start,
                end,
                class: TokenClass::String,
            });
            continue;
        }

        // Numbers.
        if c.is_ascii_digit() {
            let mut end = start + 1;
            let mut prev = c;
            while let Some(&(idx, nc)) = chars.peek() {
                let keep = nc.is_ascii_alphanumeric()
                    || nc == '.'
                    || nc == '_'
                    || ((nc == '+' || nc == '-') && (prev == 'e' || prev == 'E'));
                if !keep {
                    break;
                }
                end = idx + nc.len_utf8();
                prev = nc;
                chars.next();
            }
            spans.push(ClassifiedSpan {
                start,
                end,
                class: TokenClass::Number,
            });
            continue;
        }

        // Identifiers and keywords.
        if is_ident_start(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(idx, nc)) = chars.peek() {
                if !is_ident_continue(nc) {
                    break;
                }
                end = idx + nc.len_utf8();
                chars.next();
            }
            let word = &code[start..end];
            let class = if KEYWORDS.contains(&word) {
                TokenClass::Keyword
            } else {
                TokenClass::Identifier
            };
            spans.push(ClassifiedSpan { start, end, class });
            continue;
        }

        // Everything else is a single-character operator token.
        let end = start + c.len_utf8();
        spans.push(ClassifiedSpan {
            start,
            end,
            class: TokenClass::Operator,
        });
    }

    spans
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
