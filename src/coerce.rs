//! Retyping rules. Every (source, target) pair yields a value; many are lossy.

use crate::codec::{self, Format};
use crate::statics;
use crate::value::{Value, ValueKind};
use base64::Engine as _;
use chrono::Utc;
use indexmap::IndexMap;

/// Human readable text of a value, used as the pivot of most coercions.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::Null => statics::LITERAL_NULL.to_string(),
        Value::Bool(b) => bool_literal(*b).to_string(),
        Value::Number(n) => codec::format_number(*n),
        Value::String(s) => s.clone(),
        Value::Date(d) => Value::format_date(d),
        Value::Binary(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
        Value::Array(_) | Value::Object(_) => codec::to_compact_text(value),
    }
}

pub(crate) fn bool_literal(b: bool) -> &'static str {
    if b {
        statics::LITERAL_TRUE
    } else {
        statics::LITERAL_FALSE
    }
}

/// Parses a floating-point literal; anything unparsable or non-finite is `0`.
pub fn parse_number(text: &str) -> f64 {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Converts `value` to `target`.
///
/// Retyping to the value's own kind returns it unchanged. Dates always
/// become "now", to the second. Scalars reach containers through their text
/// rendering.
pub fn coerce(value: &Value, target: ValueKind) -> Value {
    if value.kind() == target {
        return value.clone();
    }
    match target {
        ValueKind::Null => Value::Null,
        ValueKind::String => Value::String(render_text(value)),
        ValueKind::Number => Value::Number(to_number(value)),
        ValueKind::Bool => Value::Bool(to_number(value) != 0.0),
        ValueKind::Date => Value::date(Utc::now()),
        ValueKind::Binary => Value::Binary(render_text(value).into_bytes()),
        ValueKind::Object => match value {
            Value::Array(items) => Value::Object(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect(),
            ),
            Value::Null => Value::empty_object(),
            _ => container_from_text(value, target),
        },
        ValueKind::Array => match value {
            Value::Object(map) => Value::Array(map.values().cloned().collect()),
            Value::Null => Value::empty_array(),
            _ => container_from_text(value, target),
        },
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        // A boolean renders as a word, but its numeric reading is 1 or 0.
        Value::Bool(b) => f64::from(u8::from(*b)),
        other => parse_number(&render_text(other)),
    }
}

fn container_from_text(value: &Value, target: ValueKind) -> Value {
    let text = render_text(value);
    match codec::from_source(&text, Format::Json) {
        Ok(parsed) if parsed.is_container() => coerce(&parsed, target),
        _ => {
            let wrapped = vec![value.clone()];
            if target == ValueKind::Array {
                Value::Array(wrapped)
            } else {
                coerce(&Value::Array(wrapped), ValueKind::Object)
            }
        }
    }
}

/// Value given to a freshly inserted item of `kind`.
pub fn default_for(kind: ValueKind) -> Value {
    match kind {
        ValueKind::Null => Value::Null,
        ValueKind::Bool => Value::Bool(false),
        ValueKind::Number => Value::Number(0.0),
        ValueKind::String => Value::String(String::new()),
        ValueKind::Date => Value::date(Utc::now()),
        ValueKind::Binary => Value::Binary(Vec::new()),
        ValueKind::Array => Value::empty_array(),
        ValueKind::Object => Value::Object(IndexMap::new()),
    }
}

/// Decodes pasted base64, dropping a data-URL header such as
/// `data:image/png;base64,`. Invalid input yields empty data.
pub fn binary_from_base64(text: &str) -> Vec<u8> {
    let payload = match text.split_once(statics::BASE64_MARKER) {
        Some((_, rest)) => rest.replace(statics::BASE64_MARKER, ""),
        None => text.to_string(),
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .unwrap_or_default()
}
