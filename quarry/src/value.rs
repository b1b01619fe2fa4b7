//! Helpers for working with the loosely typed JSON values that flow between
//! the query backend, user scripts and the results view.

use std::{fs, path::Path};

use serde_json::Value as JsonValue;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime,
};

use crate::{config::SupportedFormat, Error};

/// Load arbitrary structured data from the given JSON or YAML file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<JsonValue, Error> {
    let path = path.as_ref();
    let fmt = SupportedFormat::for_path(path)?;
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("while trying to read from {}", path.display()), e))?;
    Ok(match fmt {
        SupportedFormat::Json => serde_json::from_str(&content)?,
        SupportedFormat::Yaml => serde_yaml::from_str(&content)?,
    })
}

/// Renders a value the way it is shown to users: strings verbatim, numbers
/// without a trailing `.0`, `null` as the empty string, and nested values as
/// compact JSON.
pub fn display_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => number_to_string(f),
            _ => n.to_string(),
        },
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

/// Formats a float the way JavaScript's `String(n)` does: the shortest
/// round-tripping digits, whole numbers without a fractional part, and
/// exponent notation outside `1e-6..1e21`.
pub fn number_to_string(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f == 0.0 {
        return "0".to_string();
    }
    let abs = f.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{}", f);
    }
    let exp = format!("{:e}", f);
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{}e+{}", mantissa, power),
        _ => exp,
    }
}

/// Attempt to interpret the value as a number. Numbers qualify directly;
/// strings qualify when their whole trimmed content is a finite number.
pub fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_number(s),
        _ => None,
    }
}

pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse the longest leading decimal number in the string, the way a
/// lenient number parser would: `"50%"` yields `50`, `"abc"` yields nothing.
pub fn parse_number_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if frac_end > frac_start || digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Whether the value is a string holding a calendar date or timestamp.
pub fn is_date_like(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(s) => parse_date(s.trim()),
        _ => false,
    }
}

fn parse_date(s: &str) -> bool {
    OffsetDateTime::parse(s, &Rfc3339).is_ok()
        || Date::parse(s, format_description!("[year]-[month]-[day]")).is_ok()
        || PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
        .is_ok()
        || PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
        .is_ok()
        || PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        )
        .is_ok()
}

/// Normalize the row sets returned by the query backend before they are
/// handed to a user script: one array per slot, in slot order.
///
/// `null` becomes an empty row set, any other non-array value becomes a
/// single-row set, and missing slots are padded with empty row sets.
pub fn normalize_row_sets(row_sets: Vec<JsonValue>, slots: usize) -> Vec<JsonValue> {
    let mut normalized = row_sets
        .into_iter()
        .take(slots)
        .map(|rows| match rows {
            JsonValue::Array(_) => rows,
            JsonValue::Null => JsonValue::Array(Vec::new()),
            other => JsonValue::Array(vec![other]),
        })
        .collect::<Vec<JsonValue>>();
    while normalized.len() < slots {
        normalized.push(JsonValue::Array(Vec::new()));
    }
    normalized
}

/// A short description of a value's JSON type, for error messages.
pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
