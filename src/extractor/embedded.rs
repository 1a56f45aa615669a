//! Pulling structured data out of raw response bodies.
//!
//! Both strategies return an untyped [`serde_json::Value`]; resolvers read
//! fields from it explicitly and never hand it to callers.

use super::types::{ParseError, VideoSource};
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("marker `{0}` not found in page")]
    MarkerNotFound(String),
    #[error("no JSON value after marker `{0}`")]
    Unbalanced(String),
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ExtractError {
    pub fn into_parse_error(self, platform: VideoSource) -> ParseError {
        ParseError::shape(platform, self.to_string())
    }
}

/// Find `marker` in `html` and parse the JSON object or array that starts
/// after it, e.g. `window._ROUTER_DATA = {...}</script>`.
///
/// Only the balanced braces are read, so trailing `;` or broken markup after
/// the value does not matter.
pub fn embedded_json(html: &str, marker: &str) -> Result<Value, ExtractError> {
    let raw = embedded_json_text(html, marker)?;
    Ok(serde_json::from_str(raw)?)
}

/// Like [`embedded_json`], for pages that assign a JavaScript literal rather
/// than strict JSON (bare `undefined` values).
pub fn embedded_js_object(html: &str, marker: &str) -> Result<Value, ExtractError> {
    let raw = embedded_json_text(html, marker)?;
    Ok(serde_json::from_str(&normalize_js_literal(raw))?)
}

/// Parse a JSON API response body.
pub fn api_json(body: &str) -> Result<Value, ExtractError> {
    Ok(serde_json::from_str(body.trim_start_matches('\u{feff}'))?)
}

fn embedded_json_text<'a>(html: &'a str, marker: &str) -> Result<&'a str, ExtractError> {
    let at = html
        .find(marker)
        .ok_or_else(|| ExtractError::MarkerNotFound(marker.to_string()))?;
    let rest = &html[at + marker.len()..];
    let start = rest
        .find(['{', '['])
        .ok_or_else(|| ExtractError::Unbalanced(marker.to_string()))?;
    // Anything other than assignment noise between marker and value means
    // we latched onto the wrong occurrence.
    if !rest[..start]
        .chars()
        .all(|c| c.is_whitespace() || c == '=' || c == '>' || c == ':')
    {
        return Err(ExtractError::Unbalanced(marker.to_string()));
    }
    let len = balanced_len(&rest[start..]).ok_or_else(|| ExtractError::Unbalanced(marker.to_string()))?;
    Ok(&rest[start..start + len])
}

/// Byte length of the bracketed value at the start of `s`, honouring string
/// literals and escapes.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Replace bare `undefined` tokens outside string literals with `null`.
fn normalize_js_literal(raw: &str) -> String {
    const UNDEFINED: &str = "undefined";
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < raw.len() {
        let rest = &raw[i..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if rest.starts_with(UNDEFINED) {
            let before_ok = raw[..i]
                .chars()
                .next_back()
                .map_or(true, |p| !p.is_alphanumeric() && p != '_');
            let after_ok = rest[UNDEFINED.len()..]
                .chars()
                .next()
                .map_or(true, |n| !n.is_alphanumeric() && n != '_');
            if before_ok && after_ok {
                out.push_str("null");
                i += UNDEFINED.len();
                continue;
            }
        }
        out.push(c);
        i += c.len_utf8();
    }
    out
}

// ============ Field access ============

pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// String or number at `pointer` as text; empty when absent.
pub fn string_at(value: &Value, pointer: &str) -> String {
    match value.pointer(pointer) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Integer at `pointer`, accepting numeric strings and floats.
pub fn i64_at(value: &Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whole seconds to milliseconds; negative is unknown (0) and huge values saturate.
pub fn secs_to_ms(secs: i64) -> u64 {
    u64::try_from(secs).unwrap_or(0).saturating_mul(1000)
}

pub fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Value at `pointer`, or [`ParseError::UpstreamShapeChanged`] naming the path.
pub fn require<'a>(value: &'a Value, pointer: &str, platform: VideoSource) -> Result<&'a Value, ParseError> {
    match value.pointer(pointer) {
        Some(Value::Null) | None => Err(ParseError::shape(platform, format!("missing field {}", pointer))),
        Some(v) => Ok(v),
    }
}

// ============ URL helpers ============

/// Last non-empty path segment, ignoring query and trailing slashes.
pub fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
