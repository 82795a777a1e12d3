use crate::error::EditError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Date,
    Binary,
    Array,
    Object,
}

impl ValueKind {
    pub const ALL: [ValueKind; 8] = [
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Number,
        ValueKind::String,
        ValueKind::Date,
        ValueKind::Binary,
        ValueKind::Array,
        ValueKind::Object,
    ];

    pub fn is_container(self) -> bool {
        matches!(self, ValueKind::Array | ValueKind::Object)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Date => "date",
            ValueKind::Binary => "data",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }

    /// Inverse of [`ValueKind::name`], also accepting the presentation labels
    /// ("Dictionary", "Boolean", ...) case-insensitively.
    pub fn parse(text: &str) -> Option<ValueKind> {
        let lower = text.trim().to_ascii_lowercase();
        let kind = match lower.as_str() {
            "null" => ValueKind::Null,
            "bool" | "boolean" => ValueKind::Bool,
            "number" | "real" | "integer" => ValueKind::Number,
            "string" => ValueKind::String,
            "date" => ValueKind::Date,
            "data" | "binary" => ValueKind::Binary,
            "array" => ValueKind::Array,
            "object" | "dictionary" | "dict" => ValueKind::Object,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node of a property tree, shared by the JSON and Plist codecs.
///
/// Equality is structural. Object equality ignores key order, array equality
/// does not. Numbers and booleans are disjoint tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Kept to whole seconds once it passes through a codec or an edit.
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::Binary(_) => ValueKind::Binary,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_container(&self) -> bool {
        self.kind().is_container()
    }

    pub fn empty_object() -> Value {
        Value::Object(IndexMap::new())
    }

    pub fn empty_array() -> Value {
        Value::Array(Vec::new())
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Array(values) => values.len(),
            Value::Object(map) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a direct child. Array children are addressed by their index as text.
    pub fn child(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            Value::Array(values) => key.parse::<usize>().ok().and_then(|i| values.get(i)),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object(map) => map.get_mut(key),
            Value::Array(values) => key
                .parse::<usize>()
                .ok()
                .and_then(move |i| values.get_mut(i)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|m| m.get(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.as_object_mut().and_then(|m| m.get_mut(key))
    }

    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |node, key| node.child(key.as_ref()))
    }

    pub fn get_path_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Value> {
        let mut node = self;
        for key in path {
            node = node.child_mut(key.as_ref())?;
        }
        Some(node)
    }

    /// Replaces the existing node at `path`. The node must already exist.
    pub fn replace_at<S: AsRef<str>>(&mut self, path: &[S], value: Value) -> Result<(), EditError> {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return Ok(());
        };
        let parent = self
            .get_path_mut(parents)
            .ok_or_else(|| EditError::KeyNotFound(format_path(parents)))?;
        let kind = parent.kind();
        let last = last.as_ref();
        match parent {
            Value::Object(map) => {
                let slot = map
                    .get_mut(last)
                    .ok_or_else(|| EditError::KeyNotFound(last.to_string()))?;
                *slot = value;
            }
            Value::Array(values) => {
                let index = parse_index(last, values.len())?;
                values[index] = value;
            }
            _ => return Err(EditError::NotAContainer(kind)),
        }
        Ok(())
    }

    /// Text rendering of a date used by every textual surface of the crate.
    pub fn format_date(date: &DateTime<Utc>) -> String {
        date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// A date value cut to whole seconds, the precision a binary plist keeps
    /// exactly.
    pub fn date(date: DateTime<Utc>) -> Value {
        Value::Date(date.trunc_subsecs(0))
    }

    /// Cuts every date in the tree to whole seconds.
    pub(crate) fn truncate_dates(&mut self) {
        match self {
            Value::Date(d) => *d = d.trunc_subsecs(0),
            Value::Array(values) => values.iter_mut().for_each(Value::truncate_dates),
            Value::Object(map) => map.values_mut().for_each(Value::truncate_dates),
            _ => {}
        }
    }
}

/// Parses an array key, requiring `index < len`.
pub(crate) fn parse_index(key: &str, len: usize) -> Result<usize, EditError> {
    let index = key
        .trim()
        .parse::<usize>()
        .map_err(|_| EditError::InvalidIndex(key.to_string()))?;
    if index >= len {
        return Err(EditError::IndexOutOfBounds { index, len });
    }
    Ok(index)
}

/// Renders a key path as `/a/0/b`; the root is `/`.
pub fn format_path<S: AsRef<str>>(path: &[S]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for key in path {
        out.push('/');
        out.push_str(key.as_ref());
    }
    out
}

/// Splits `/a/0/b` into keys. Empty segments are ignored, so `""` and `/` are the root.
pub fn parse_path(text: &str) -> Vec<String> {
    text.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::date(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Object(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.serialize_str(&Value::format_date(d)),
            Value::Binary(bytes) => serializer.serialize_bytes(bytes),
            Value::Array(values) => values.serialize(serializer),
            Value::Object(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> de::Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a property-list value")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Value::Null)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Value::Number(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Value::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(Value::Number(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Value::String(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(Value::String(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Value::Binary(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(Value::Binary(v))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<Value>()? {
                    values.push(value);
                }
                Ok(Value::Array(values))
            }

            fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                // Later duplicates overwrite earlier ones, keeping the first position.
                let mut values = IndexMap::new();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    values.insert(key, value);
                }
                Ok(Value::Object(values))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
