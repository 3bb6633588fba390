//! Structured decoding of free-text model output.
//!
//! Models wrap JSON in markdown fences, surround it with prose, or emit
//! near-JSON (trailing commas, single quotes, Python literals). `parse`
//! tolerates all of these and reports anything else as a `ParseFailure`
//! value instead of an error that aborts the pipeline.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ParseFailure;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Result of decoding model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Failed(ParseFailure),
}

impl<T> ParseOutcome<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    pub fn into_result(self) -> Result<T, ParseFailure> {
        match self {
            Self::Parsed(value) => Ok(value),
            Self::Failed(failure) => Err(failure),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            Self::Parsed(value) => ParseOutcome::Parsed(f(value)),
            Self::Failed(failure) => ParseOutcome::Failed(failure),
        }
    }
}

impl<T> From<ParseOutcome<T>> for Result<T, ParseFailure> {
    fn from(outcome: ParseOutcome<T>) -> Self {
        outcome.into_result()
    }
}

/// Decode `raw` into `T`.
///
/// 1. Take the inside of the first fenced code block, if any.
/// 2. Narrow to the span from the first `{` to the last `}`.
/// 3. Decode.
/// 4. On failure, repair common near-JSON mistakes and decode once more.
/// 5. Otherwise return `Failed` carrying the raw text.
pub fn parse<T: DeserializeOwned>(raw: &str) -> ParseOutcome<T> {
    if raw.trim().is_empty() {
        return ParseOutcome::Failed(ParseFailure {
            reason: "empty response".to_string(),
            raw: raw.to_string(),
        });
    }

    let candidate = extract_json_object(raw);

    let first_error = match decode_object::<T>(candidate) {
        Ok(value) => return ParseOutcome::Parsed(value),
        Err(e) => e,
    };

    // Cheapest fix first, then the full repair pass.
    let mut attempts = vec![strip_trailing_commas(candidate)];
    let repaired = repair_json(candidate);
    if repaired != attempts[0] {
        attempts.push(repaired);
    }

    let mut last_error = first_error;
    for attempt in attempts.iter().filter(|a| a.as_str() != candidate) {
        match decode_object::<T>(attempt) {
            Ok(value) => {
                debug!("Model output decoded after repair");
                return ParseOutcome::Parsed(value);
            }
            Err(e) => last_error = e,
        }
    }

    warn!(error = %last_error, raw_response = %raw, "Failed to decode model output");
    ParseOutcome::Failed(ParseFailure {
        reason: last_error,
        raw: raw.to_string(),
    })
}

/// Decode a JSON object into `T`. Arrays and scalars are rejected even when
/// `T` would accept them.
fn decode_object<T: DeserializeOwned>(candidate: &str) -> Result<T, String> {
    let value: Value =
        serde_json::from_str(candidate).map_err(|e| format!("JSON parse error: {e}"))?;
    if !value.is_object() {
        return Err("JSON parse error: expected an object".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("unexpected JSON shape: {e}"))
}

/// Narrow model output to the most likely JSON object.
///
/// Falls back to the (unfenced, trimmed) text when no braces are present.
pub fn extract_json_object(text: &str) -> &str {
    let unfenced = FENCED_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim();

    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}'))
        && end > start
    {
        return &unfenced[start..=end];
    }

    unfenced
}

/// Remove commas directly before `}` or `]`, outside string literals.
pub fn strip_trailing_commas(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len());
    let mut chars = candidate.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => copy_string(&mut chars, &mut out),
            ',' if next_significant(&chars).is_some_and(|n| n == '}' || n == ']') => {}
            _ => out.push(c),
        }
    }
    out
}

/// One pass over near-JSON: smart-quoted and single-quoted strings, bare
/// keys, Python literals, trailing commas.
///
/// Double-quoted string literals are copied through untouched.
pub fn repair_json(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len() + 16);
    let mut chars = candidate.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => copy_string(&mut chars, &mut out),
            '\'' => requote_string(&mut chars, &mut out, '\''),
            '\u{201C}' => requote_string(&mut chars, &mut out, '\u{201D}'),
            '\u{2018}' => requote_string(&mut chars, &mut out, '\u{2019}'),
            ',' if next_significant(&chars).is_some_and(|n| n == '}' || n == ']') => {}
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_') {
                        break;
                    }
                    word.push(n);
                    chars.next();
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    "true" | "false" | "null" => out.push_str(&word),
                    _ if next_significant(&chars) == Some(':') => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                    _ => out.push_str(&word),
                }
            }
            c if c.is_ascii_digit() || c == '-' => {
                // Keep exponents like `1e5` away from the bare-word branch.
                out.push(c);
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || matches!(n, '.' | '+' | '-')) {
                        break;
                    }
                    out.push(n);
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

/// Copy the rest of a double-quoted literal (opening quote already read).
fn copy_string(chars: &mut Chars<'_>, out: &mut String) {
    out.push('"');
    while let Some(c) = chars.next() {
        out.push(c);
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '"' => return,
            _ => {}
        }
    }
}

/// Rewrite a literal delimited by `close` as a double-quoted JSON string.
fn requote_string(chars: &mut Chars<'_>, out: &mut String, close: char) {
    out.push('"');
    while let Some(c) = chars.next() {
        match c {
            c if c == close => break,
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => {}
            },
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn next_significant(chars: &Chars<'_>) -> Option<char> {
    chars.clone().find(|c| !c.is_whitespace())
}
