//! Shared utilities for the cache library.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

/// Get the current time in milliseconds since UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Convert a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Build a deterministic cache key.
///
/// Format: `{prefix}{endpoint}[:user:{user_id}][:{params}]`, where `params` is
/// serialized as JSON with object keys sorted at every depth so two logically
/// identical parameter sets always produce the same key.
pub fn build_cache_key<P: Serialize + ?Sized>(
    prefix: &str,
    endpoint: &str,
    params: Option<&P>,
    user_id: Option<&str>,
) -> Result<String, CacheError> {
    let mut key = format!("{}{}", prefix, endpoint);

    if let Some(user_id) = user_id {
        key.push_str(":user:");
        key.push_str(user_id);
    }

    if let Some(params) = params {
        let value = serde_json::to_value(params)
            .map_err(|e| CacheError::Serialization(format!("Invalid key params: {}", e)))?;
        if !is_empty_params(&value) {
            key.push(':');
            write_canonical(&value, &mut key);
        }
    }

    Ok(key)
}

fn is_empty_params(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Strings always serialize.
                let _ = write!(out, "{}", Value::String(name.clone()));
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

/// Redis-style glob matching supporting `*`, `?`, `[...]` classes and `\` escapes.
///
/// Runs in `O(pattern * text)`: a mismatch backtracks only to the most recent `*`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let tokens = tokenize_glob(&pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Token index of the last `*` seen and the text position it currently absorbs up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(GlobToken::Star) => {
                star = Some((p, t));
                p += 1;
            }
            Some(token) if token.matches(text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    tokens[p..].iter().all(|token| matches!(token, GlobToken::Star))
}

/// One single-character step of a glob pattern.
enum GlobToken<'a> {
    Star,
    Any,
    /// Class body after `[`, including the closing `]`.
    Class(&'a [char]),
    Literal(char),
}

impl GlobToken<'_> {
    fn matches(&self, c: char) -> bool {
        match self {
            GlobToken::Star | GlobToken::Any => true,
            GlobToken::Class(body) => match_class(body, c).is_some_and(|(matched, _)| matched),
            GlobToken::Literal(literal) => *literal == c,
        }
    }
}

fn tokenize_glob(pattern: &[char]) -> Vec<GlobToken<'_>> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;

    while i < pattern.len() {
        match pattern[i] {
            '*' => {
                // Consecutive stars behave like one.
                if !matches!(tokens.last(), Some(GlobToken::Star)) {
                    tokens.push(GlobToken::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(GlobToken::Any);
                i += 1;
            }
            '[' => {
                let rest = &pattern[i + 1..];
                match match_class(rest, '\0') {
                    Some((_, after)) => {
                        let body_len = rest.len() - after.len();
                        tokens.push(GlobToken::Class(&rest[..body_len]));
                        i += 1 + body_len;
                    }
                    // Unterminated class: treat '[' literally.
                    None => {
                        tokens.push(GlobToken::Literal('['));
                        i += 1;
                    }
                }
            }
            '\\' if i + 1 < pattern.len() => {
                tokens.push(GlobToken::Literal(pattern[i + 1]));
                i += 2;
            }
            literal => {
                tokens.push(GlobToken::Literal(literal));
                i += 1;
            }
        }
    }

    tokens
}

/// Match `c` against the class body starting right after `[`.
/// Returns whether it matched and the pattern remaining after `]`.
fn match_class(body: &[char], c: char) -> Option<(bool, &[char])> {
    let (negate, mut i) = match body.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < body.len() {
        match body[i] {
            ']' => return Some((matched != negate, &body[i + 1..])),
            '\\' if i + 1 < body.len() => {
                matched |= body[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' => {
                let hi = body[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }

    None
}

/// Parse the `field:value` lines of an INFO reply, skipping section headers.
pub fn parse_info(info: &str) -> HashMap<String, String> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect()
}
