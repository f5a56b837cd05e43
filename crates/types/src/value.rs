//! Values produced by providers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed value as exchanged with providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Primitive {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Primitive>),
    Map(BTreeMap<String, Primitive>),
    /// Reference to a resource instance owned by some provider.
    Resource(ResourceRef),
}

impl Primitive {
    pub fn string(value: impl Into<String>) -> Self {
        Primitive::String(value.into())
    }

    pub fn resource(name: impl Into<String>, id: impl Into<String>) -> Self {
        Primitive::Resource(ResourceRef::new(name, id))
    }

    /// Returns the referenced resource if this value is one.
    pub fn as_resource(&self) -> Option<&ResourceRef> {
        match self {
            Primitive::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::String(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::String(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Int(value)
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Bool(value)
    }
}

/// Lightweight handle to a resource instance: its name plus an opaque id.
///
/// Field values are never carried on the handle; they are resolved lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} id = {}", self.name, self.id)
    }
}

/// Result of resolving one field: a value or a field-level error, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Primitive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawData {
    pub fn value(data: Primitive) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_uses_adjacent_tags() {
        let json = serde_json::to_value(Primitive::resource("os.file", "/etc/hosts")).unwrap();
        assert_eq!(json["type"], "resource");
        assert_eq!(json["value"]["name"], "os.file");

        let null = serde_json::to_string(&Primitive::Null).unwrap();
        assert_eq!(null, r#"{"type":"null"}"#);
    }

    #[test]
    fn raw_data_omits_empty_parts() {
        let json = serde_json::to_string(&RawData::error("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
        let parsed: RawData = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, RawData::default());
    }
}
