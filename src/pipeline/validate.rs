//! Response validation: raw model text → [`InspectionReport`].
//!
//! Models are told to answer with a bare JSON object, yet they regularly wrap
//! it in ```` ```json ```` fences or a sentence of prose. The validator strips
//! fences, keeps the span from the first `{` to the last `}` and only then
//! parses. Everything after parsing is strict: each required field is checked
//! in a fixed order and the first problem is reported. No default is ever
//! substituted for a missing field.

use crate::error::ScannoError;
use crate::output::{InspectionReport, RiskLevel};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Parse and validate a model response.
///
/// # Errors
/// * [`ScannoError::MalformedResponse`]: no JSON object could be parsed
/// * [`ScannoError::SchemaViolation`]: a required field is missing, has the
///   wrong type, or `risk_level` is not a known level
pub fn validate(raw: &str) -> Result<InspectionReport, ScannoError> {
    let candidate = json_candidate(raw).ok_or_else(|| malformed("no JSON object found", raw))?;

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| malformed(&format!("invalid JSON: {}", e), raw))?;
    let obj = match value {
        Value::Object(map) => map,
        other => {
            return Err(malformed(
                &format!("expected a JSON object, got {}", json_type(&other)),
                raw,
            ))
        }
    };

    let summary = string_field(&obj, "summary")?;
    let risk_level = risk_level_field(&obj)?;
    let issues = string_list_field(&obj, "issues")?;
    let maintenance = string_list_field(&obj, "maintenance")?;
    let recommendation = string_field(&obj, "recommendation")?;

    debug!(
        "Validated report: {} ({} issues, {} maintenance items)",
        risk_level,
        issues.len(),
        maintenance.len()
    );

    Ok(InspectionReport::new(
        summary,
        risk_level,
        issues,
        maintenance,
        recommendation,
    ))
}

/// The slice of `raw` most likely to hold the JSON object.
fn json_candidate(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let body = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

fn malformed(detail: &str, raw: &str) -> ScannoError {
    ScannoError::MalformedResponse {
        detail: detail.to_string(),
        raw: raw.to_string(),
    }
}

fn violation(field: &str, detail: impl Into<String>) -> ScannoError {
    ScannoError::SchemaViolation {
        field: field.to_string(),
        detail: detail.into(),
    }
}

fn required<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a Value, ScannoError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(violation(field, "missing")),
        Some(v) => Ok(v),
    }
}

fn string_field(obj: &Map<String, Value>, field: &str) -> Result<String, ScannoError> {
    match required(obj, field)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(violation(
            field,
            format!("expected a string, got {}", json_type(other)),
        )),
    }
}

fn risk_level_field(obj: &Map<String, Value>) -> Result<RiskLevel, ScannoError> {
    let raw = string_field(obj, "risk_level")?;
    raw.parse::<RiskLevel>()
        .map_err(|_| violation("risk_level", format!("unknown risk level '{}'", raw)))
}

fn string_list_field(obj: &Map<String, Value>, field: &str) -> Result<Vec<String>, ScannoError> {
    let items = match required(obj, field)? {
        Value::Array(items) => items,
        other => {
            return Err(violation(
                field,
                format!("expected an array of strings, got {}", json_type(other)),
            ))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(violation(
                field,
                format!("element {} is {}, not a string", idx, json_type(other)),
            )),
        })
        .collect()
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
