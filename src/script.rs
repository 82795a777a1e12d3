//! Bridge to an embedded scripting engine.
//!
//! Scripts see a node as a [`ScriptValue`] graph and hand back a graph of the
//! same shape. Assignment goes through the normal view edit path, so script
//! edits propagate exactly like interactive ones.

use crate::codec::{self, Format};
use crate::coerce;
use crate::document::Document;
use crate::error::EditError;
use crate::statics;
use crate::value::{Value, ValueKind};
use crate::view::ViewId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// A value in the scripting engine's object model.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<ScriptValue>),
    Object(IndexMap<String, ScriptValue>),
    /// Typed array or buffer.
    Bytes(Vec<u8>),
    /// A callable; only its source text survives conversion.
    Function(String),
}

impl ScriptValue {
    /// Native graph for a tree value. Data becomes a byte buffer.
    pub fn from_value(value: &Value) -> ScriptValue {
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(*n),
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Date(d) => ScriptValue::Date(*d),
            Value::Binary(bytes) => ScriptValue::Bytes(bytes.clone()),
            Value::Array(values) => ScriptValue::Array(values.iter().map(ScriptValue::from_value).collect()),
            Value::Object(map) => ScriptValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::from_value(v)))
                    .collect(),
            ),
        }
    }

    /// Tree value for this graph, adapted to what `format` can store.
    ///
    /// Containers convert recursively and the basic scalars map directly.
    /// Anything else is stored as its text rendering.
    pub fn to_value(&self, format: Format) -> Value {
        match self {
            ScriptValue::Null if !format.supports(ValueKind::Null) => {
                Value::String(statics::LITERAL_NULL.to_string())
            }
            ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => Value::Number(*n),
            ScriptValue::String(s) => Value::String(s.clone()),
            ScriptValue::Date(d) if format.supports(ValueKind::Date) => Value::date(*d),
            ScriptValue::Date(d) => Value::String(Value::format_date(d)),
            ScriptValue::Array(items) => Value::Array(items.iter().map(|v| v.to_value(format)).collect()),
            ScriptValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value(format)))
                    .collect(),
            ),
            ScriptValue::Undefined => Value::String(statics::LITERAL_UNDEFINED.to_string()),
            ScriptValue::Bytes(bytes) => Value::String(coerce::render_text(&Value::Binary(bytes.clone()))),
            ScriptValue::Function(source) => Value::String(source.clone()),
        }
    }
}

impl From<serde_json::Value> for ScriptValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScriptValue::Null,
            serde_json::Value::Bool(b) => ScriptValue::Bool(b),
            serde_json::Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => ScriptValue::String(s),
            serde_json::Value::Array(items) => ScriptValue::Array(items.into_iter().map(ScriptValue::from).collect()),
            serde_json::Value::Object(map) => {
                ScriptValue::Object(map.into_iter().map(|(k, v)| (k, ScriptValue::from(v))).collect())
            }
        }
    }
}

/// Console rendering of a script value.
pub fn describe(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Undefined => statics::LITERAL_UNDEFINED.to_string(),
        ScriptValue::Null => statics::LITERAL_NULL.to_string(),
        ScriptValue::String(s) => serde_json::Value::String(s.clone()).to_string(),
        ScriptValue::Function(source) => source.clone(),
        ScriptValue::Array(_) | ScriptValue::Object(_) => {
            codec::to_pretty_text(&value.to_value(Format::Json)).trim_end().to_string()
        }
        ScriptValue::Bool(b) => coerce::render_text(&Value::Bool(*b)),
        ScriptValue::Number(n) => coerce::render_text(&Value::Number(*n)),
        ScriptValue::Date(d) => Value::format_date(d),
        ScriptValue::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

impl Document {
    /// Current value of the view, translated for a script.
    pub fn snapshot_for_script(&self, id: ViewId) -> Result<ScriptValue, EditError> {
        Ok(ScriptValue::from_value(self.value(id)?))
    }

    /// Replaces the view's value with a script-produced graph.
    pub fn set_from_script(&mut self, id: ViewId, native: &ScriptValue) -> Result<(), EditError> {
        let value = native.to_value(self.format());
        self.set_value(id, value)
    }
}
