//! List rows for a container: key, kind label and a one-line summary.

use crate::codec::{self, Format};
use crate::coerce;
use crate::statics;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub kind: ValueKind,
    pub summary: String,
}

/// One row per child of a container; scalars have no rows.
pub fn rows(value: &Value) -> Vec<Row> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| row(k.clone(), v)).collect(),
        Value::Array(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| row(i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn row(key: String, value: &Value) -> Row {
    Row {
        key,
        kind: value.kind(),
        summary: summary(value),
    }
}

/// Row describing the root container itself.
pub fn root_row(value: &Value) -> Row {
    row(statics::EN_ROOT_KEY.to_string(), value)
}

pub fn summary(value: &Value) -> String {
    let text = match value {
        Value::Bool(true) => statics::EN_BOOL_YES.to_string(),
        Value::Bool(false) => statics::EN_BOOL_NO.to_string(),
        Value::Array(values) => format!("[{}]", values.len()),
        Value::Object(map) => format!("{{{}}}", map.len()),
        Value::Binary(bytes) => format!("<{} bytes>", bytes.len()),
        other => coerce::render_text(other),
    };
    truncate(text.lines().next().unwrap_or_default())
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= statics::SUMMARY_MAX_CHARS {
        return line.to_string();
    }
    let keep = statics::SUMMARY_MAX_CHARS - statics::EN_ELLIPSIS.len();
    let mut out: String = line.chars().take(keep).collect();
    out.push_str(statics::EN_ELLIPSIS);
    out
}

pub fn kind_label(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Object => statics::EN_TYPE_DICTIONARY,
        ValueKind::Array => statics::EN_TYPE_ARRAY,
        ValueKind::String => statics::EN_TYPE_STRING,
        ValueKind::Number => statics::EN_TYPE_NUMBER,
        ValueKind::Bool => statics::EN_TYPE_BOOLEAN,
        ValueKind::Binary => statics::EN_TYPE_DATA,
        ValueKind::Date => statics::EN_TYPE_DATE,
        ValueKind::Null => statics::EN_TYPE_NULL,
    }
}

/// Kinds offered when adding an item, in menu order.
pub fn insertable_kinds(format: Format) -> Vec<ValueKind> {
    const ORDER: [ValueKind; 8] = [
        ValueKind::Object,
        ValueKind::Array,
        ValueKind::String,
        ValueKind::Number,
        ValueKind::Bool,
        ValueKind::Binary,
        ValueKind::Date,
        ValueKind::Null,
    ];
    ORDER
        .into_iter()
        .filter(|kind| format.supports(*kind))
        .collect()
}

/// Multi-line rendering for a detail pane.
pub fn detail(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => codec::to_pretty_text(value),
        other => coerce::render_text(other),
    }
}
