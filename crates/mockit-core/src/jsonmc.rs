//! JsonMC: the JSON dialect with `//`/`/* */` comments, backtick multiline
//! strings, and `@{VAR}`/`@{VAR:-DEFAULT}` environment-variable expansion.
//!
//! Parsing is a pure function of its input text and the process environment:
//! no other I/O is performed. The algorithm is a single left-to-right pass
//! that rewrites the document into strict JSON, then hands off to `serde_json`.

use crate::{Error, Result};
use serde_json::Value;
use std::env;

/// Parse a JsonMC document into a [`serde_json::Value`].
pub fn parse(input: &str) -> Result<Value> {
    let expanded = expand_env(input)?;
    let rewritten = rewrite(&expanded)?;
    serde_json::from_str(&rewritten).map_err(|e| Error::jsonmc(format!("invalid JSON after rewrite: {e}")))
}

/// Parse a JsonMC document and deserialize it into `T`.
pub fn parse_into<T: serde::de::DeserializeOwned>(input: &str) -> Result<T> {
    let value = parse(input)?;
    serde_json::from_value(value).map_err(|e| Error::jsonmc(format!("document did not match schema: {e}")))
}

/// Step 1: replace every `@{NAME}` / `@{NAME:-DEFAULT}` with its expansion.
/// Distinct from `${...}`, which is reserved for response templates and is
/// left untouched here.
fn expand_env(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' && bytes.get(i + 1) == Some(&b'{') {
            let close = input[i + 2..]
                .find('}')
                .map(|p| i + 2 + p)
                .ok_or_else(|| Error::jsonmc("unterminated @{...} environment reference"))?;
            let body = &input[i + 2..close];
            let (name, default) = match body.split_once(":-") {
                Some((n, d)) => (n, Some(d)),
                None => (body, None),
            };
            let value = match env::var(name) {
                Ok(v) if !v.is_empty() => v,
                Ok(_) | Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(Error::jsonmc(format!(
                            "environment variable '{name}' is undefined and no default was given"
                        )))
                    }
                },
            };
            out.push_str(&value);
            i = close + 1;
        } else {
            // advance by one UTF-8 scalar, not necessarily one byte
            let ch_len = utf8_len(bytes[i]);
            out.push_str(&input[i..i + ch_len]);
            i += ch_len;
        }
    }
    Ok(out)
}

fn utf8_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    RegularString,
    SingleLineComment,
    MultiLineComment,
    MultilineString,
}

/// Step 2: strip comments and rewrite backtick multiline strings into
/// ordinary JSON string literals.
fn rewrite(input: &str) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = State::Default;
    let mut i = 0;
    let mut multiline_buf = String::new();

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Default => match c {
                '/' if next == Some('/') => {
                    state = State::SingleLineComment;
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    state = State::MultiLineComment;
                    i += 2;
                    continue;
                }
                '"' => {
                    state = State::RegularString;
                    out.push(c);
                }
                '`' => {
                    state = State::MultilineString;
                    multiline_buf.clear();
                }
                _ => out.push(c),
            },
            State::RegularString => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = next {
                        out.push(escaped);
                        i += 2;
                        continue;
                    }
                } else if c == '"' {
                    state = State::Default;
                }
            }
            State::SingleLineComment => {
                if c == '\n' {
                    state = State::Default;
                    out.push(c);
                }
            }
            State::MultiLineComment => {
                if c == '*' && next == Some('/') {
                    state = State::Default;
                    i += 2;
                    continue;
                }
            }
            State::MultilineString => {
                if c == '`' {
                    out.push('"');
                    out.push_str(&encode_multiline(&multiline_buf));
                    out.push('"');
                    state = State::Default;
                } else {
                    multiline_buf.push(c);
                }
            }
        }
        i += 1;
    }

    match state {
        State::Default => {}
        State::MultiLineComment => return Err(Error::jsonmc("unterminated /* */ comment")),
        State::MultilineString => return Err(Error::jsonmc("unterminated ` multiline string")),
        State::RegularString => return Err(Error::jsonmc("unterminated \" string")),
        State::SingleLineComment => {}
    }

    Ok(out)
}

/// Escape a multiline-string body into the contents of a JSON string literal:
/// `\` -> `\\`, `"` -> `\"`, `\r\n` -> `\n`, raw `\n` passes through as `\n`.
fn encode_multiline(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}
