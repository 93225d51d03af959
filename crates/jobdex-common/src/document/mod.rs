//! Loosely typed record values
//!
//! Decoded job records have no fixed schema: the same field can hold an
//! object in one record and a scalar in the next. [`Document`] is the tagged
//! value every pipeline stage works on, and [`FieldPath`] navigates it by
//! dotted path.
//!
//! # Example
//!
//! ```
//! use jobdex_common::document::{Document, FieldPath};
//! use serde_json::json;
//!
//! let mut doc = Document::from(json!({"acct": {"id": "42", "ncpus": 16}}));
//! let path = FieldPath::parse("acct.ncpus");
//!
//! assert_eq!(path.get(&doc), Some(&Document::Int(16)));
//! path.remove(&mut doc);
//! assert!(path.get(&doc).is_none());
//! ```

mod map;
mod path;

pub use map::Map;
pub use path::FieldPath;

use crate::error::Result;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// One decoded record, or any value nested inside it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Document {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Document>),
    Map(Map),
}

impl Document {
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Document::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Document]> {
        match self {
            Document::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Document::Map(_))
    }

    /// True for NaN and infinite floats, which a JSON sink cannot store.
    pub fn is_non_finite(&self) -> bool {
        matches!(self, Document::Float(f) if !f.is_finite())
    }

    /// Compact JSON rendering, keys in insertion order.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Convert into a `serde_json::Value`.
    ///
    /// Non-finite floats become `null`.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Document::Null => serde_json::Value::Null,
            Document::Bool(b) => serde_json::Value::Bool(*b),
            Document::Int(n) => serde_json::Value::from(*n),
            Document::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Document::String(s) => serde_json::Value::String(s.clone()),
            Document::Array(items) => {
                serde_json::Value::Array(items.iter().map(Document::to_json_value).collect())
            },
            Document::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Map> for Document {
    fn from(map: Map) -> Self {
        Document::Map(map)
    }
}

impl From<Vec<Document>> for Document {
    fn from(items: Vec<Document>) -> Self {
        Document::Array(items)
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Document::String(s.to_string())
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Document::String(s)
    }
}

impl From<i64> for Document {
    fn from(n: i64) -> Self {
        Document::Int(n)
    }
}

impl From<f64> for Document {
    fn from(f: f64) -> Self {
        Document::Float(f)
    }
}

impl From<bool> for Document {
    fn from(b: bool) -> Self {
        Document::Bool(b)
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Document::Null,
            serde_json::Value::Bool(b) => Document::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Document::Int(i),
                // u64 beyond i64::MAX degrades to float like any JSON reader would
                None => Document::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Document::String(s),
            serde_json::Value::Array(items) => {
                Document::Array(items.into_iter().map(Document::from).collect())
            },
            serde_json::Value::Object(object) => Document::Map(
                object
                    .into_iter()
                    .map(|(k, v)| (k, Document::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Document::Null => serializer.serialize_unit(),
            Document::Bool(b) => serializer.serialize_bool(*b),
            Document::Int(n) => serializer.serialize_i64(*n),
            Document::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Document::Float(_) => serializer.serialize_unit(),
            Document::String(s) => serializer.serialize_str(s),
            Document::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            },
            Document::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip_keeps_key_order() {
        let doc = Document::from(json!({"z": 1, "a": [true, null, 2.5], "m": {"k": "v"}}));
        assert_eq!(
            doc.to_json_string().unwrap(),
            r#"{"z":1,"a":[true,null,2.5],"m":{"k":"v"}}"#
        );
    }

    #[test]
    fn test_non_finite_floats_serialize_as_null() {
        let doc = Document::Array(vec![Document::Float(f64::NAN), Document::Float(1.5)]);
        assert_eq!(doc.to_json_string().unwrap(), "[null,1.5]");
        assert_eq!(doc.to_json_value(), json!([null, 1.5]));
    }

    #[test]
    fn test_is_non_finite() {
        assert!(Document::Float(f64::INFINITY).is_non_finite());
        assert!(Document::Float(f64::NEG_INFINITY).is_non_finite());
        assert!(Document::Float(f64::NAN).is_non_finite());
        assert!(!Document::Float(0.0).is_non_finite());
        assert!(!Document::Int(7).is_non_finite());
    }
}
