//! Triple normalization: turns raw extraction output into validated triples.
//!
//! The payload is expected to be a JSON list of objects, possibly wrapped in a
//! Markdown code fence. Only the top-level shape can fail the whole batch;
//! malformed items are dropped and recorded as [`ValidationSkip`]s.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::Triple;
use crate::{KgraphError, Result};

/// Confidence assigned when an item's confidence is missing, non-numeric,
/// not finite, or outside [0, 1].
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Longest raw payload echoed back inside an `ExtractionFormat` error.
const RAW_DIAGNOSTIC_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Keep triples whose subject equals their object
    pub allow_self_loops: bool,
}

/// Why an item was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum SkipReason {
    NotAnObject,
    MissingField(&'static str),
    EmptyField(&'static str),
    SelfLoop,
}

/// A dropped item and its position in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationSkip {
    pub index: usize,
    pub reason: SkipReason,
}

/// Result of normalizing one extraction payload.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub triples: Vec<Triple>,
    pub skipped: Vec<ValidationSkip>,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```\s*$")
            .expect("Invalid regex pattern")
    })
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````) if present.
pub fn strip_code_fence(raw: &str) -> &str {
    match fence_regex().captures(raw).and_then(|cap| cap.get(1)) {
        Some(body) => body.as_str().trim(),
        None => raw.trim(),
    }
}

/// Parse and validate a raw extraction payload.
///
/// Fails with `ExtractionFormat` only when the payload is not a JSON list.
/// Every surviving triple carries `source_doc`.
pub fn normalize_extraction(
    raw: &str,
    source_doc: &str,
    options: &NormalizeOptions,
) -> Result<NormalizedBatch> {
    let source_doc = source_doc.trim();
    if source_doc.is_empty() {
        return Err(KgraphError::InvalidInput("source_doc must not be empty".to_string()));
    }

    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| format_error(raw, e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(format_error(
                raw,
                format!("expected a list of triples, found {}", json_kind(&other)),
            ))
        }
    };

    Ok(normalize_items(items, source_doc, options))
}

/// Validate already-parsed items. Never fails; bad items are skipped.
pub fn normalize_items(items: Vec<Value>, source_doc: &str, options: &NormalizeOptions) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for (index, item) in items.into_iter().enumerate() {
        match validate_item(&item, source_doc, options) {
            Ok(triple) => batch.triples.push(triple),
            Err(reason) => {
                log::debug!("Dropping extraction item {} from {}: {:?}", index, source_doc, reason);
                batch.skipped.push(ValidationSkip { index, reason });
            }
        }
    }

    if !batch.skipped.is_empty() {
        log::info!(
            "Normalized {} triple(s) from {} ({} skipped)",
            batch.triples.len(),
            source_doc,
            batch.skipped.len()
        );
    }

    batch
}

fn validate_item(
    item: &Value,
    source_doc: &str,
    options: &NormalizeOptions,
) -> std::result::Result<Triple, SkipReason> {
    let fields = item.as_object().ok_or(SkipReason::NotAnObject)?;

    let subject = required_text(fields, "subject")?;
    let predicate = required_text(fields, "predicate")?;
    let object = required_text(fields, "object")?;

    if subject == object && !options.allow_self_loops {
        return Err(SkipReason::SelfLoop);
    }

    let span = fields
        .get("span")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    Ok(Triple {
        subject,
        predicate,
        object,
        confidence: coerce_confidence(fields.get("confidence")),
        span,
        source_doc: source_doc.to_string(),
    })
}

fn required_text(fields: &Map<String, Value>, field: &'static str) -> std::result::Result<String, SkipReason> {
    let text = match fields.get(field) {
        None | Some(Value::Null) => return Err(SkipReason::MissingField(field)),
        Some(Value::String(s)) => s.trim(),
        Some(_) => return Err(SkipReason::MissingField(field)),
    };
    if text.is_empty() {
        return Err(SkipReason::EmptyField(field));
    }
    Ok(text.to_string())
}

fn coerce_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => c,
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Leading part of a rejected payload, cut on a char boundary.
pub(crate) fn diagnostic_excerpt(raw: &str) -> String {
    let mut end = raw.len().min(RAW_DIAGNOSTIC_LIMIT);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

fn format_error(raw: &str, reason: String) -> KgraphError {
    log::warn!("Rejecting extraction payload: {}", reason);
    KgraphError::ExtractionFormat {
        reason,
        raw: diagnostic_excerpt(raw),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
