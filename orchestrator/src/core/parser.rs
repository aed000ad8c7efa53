//! Extraction of structured payloads from free-form backend text.
//!
//! Backends answer in prose, fenced blocks, or bare JSON. The parser finds the
//! candidate object and decodes it strictly: any failure is reported as
//! [`MalformedPayload`], never papered over with a default value.

use std::marker::PhantomData;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::core::payload::StagePayload;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("json fence regex should be valid")
});

/// The backend text did not contain a decodable payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed payload: {reason}")]
pub struct MalformedPayload {
    pub reason: String,
}

impl MalformedPayload {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Locate the text that should hold the payload.
///
/// - A ```` ```json ```` fence wins; its interior is used.
/// - Text that does not start with `{` is scanned for the first balanced
///   `{...}` span.
/// - Otherwise the trimmed text is returned unchanged.
pub fn extract_candidate(raw: &str) -> &str {
    let text = match JSON_FENCE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw,
    };
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    first_balanced_object(trimmed).unwrap_or(trimmed)
}

/// Decode `raw` into a JSON object.
pub fn parse_object(raw: &str) -> Result<Value, MalformedPayload> {
    let candidate = extract_candidate(raw);
    if candidate.is_empty() {
        return Err(MalformedPayload::new("empty response"));
    }
    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| MalformedPayload::new(format!("invalid json: {err}")))?;
    if !value.is_object() {
        return Err(MalformedPayload::new("payload is not a json object"));
    }
    Ok(value)
}

/// Strict decoder for one stage payload type: JSON object, schema-valid,
/// and deserializable into `T`.
pub struct PayloadParser<T> {
    validator: Validator,
    _payload: PhantomData<fn() -> T>,
}

impl<T: StagePayload> PayloadParser<T> {
    /// Compile the embedded schema for `T`.
    pub fn new() -> anyhow::Result<Self> {
        let schema: Value = serde_json::from_str(T::SCHEMA)
            .map_err(|err| anyhow::anyhow!("parse {} schema: {err}", T::STAGE))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow::anyhow!("compile {} schema: {err}", T::STAGE))?;
        Ok(Self {
            validator,
            _payload: PhantomData,
        })
    }

    pub fn parse(&self, raw: &str) -> Result<T, MalformedPayload> {
        let value = parse_object(raw)?;
        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(MalformedPayload::new(format!(
                "{} payload violates schema: {}",
                T::STAGE,
                violations.join("; ")
            )));
        }
        serde_json::from_value(value)
            .map_err(|err| MalformedPayload::new(format!("decode {} payload: {err}", T::STAGE)))
    }
}

/// First `{...}` span whose braces balance, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    text.match_indices('{')
        .find_map(|(start, _)| balanced_from(&text[start..]))
}

fn balanced_from(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
