//! Resource schema published by providers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource table of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceInfo>,
}

impl Schema {
    /// Builder used by providers and tests to assemble a schema.
    pub fn with_resource(mut self, info: ResourceInfo) -> Self {
        self.resources.insert(info.id.clone(), info);
        self
    }
}

/// Definition of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceInfo {
    /// Fully qualified resource name, e.g. `os.file`.
    pub id: String,
    /// Provider that constructs instances. Empty for bridging resources.
    pub provider: String,
    /// Only adds fields or behavior to a resource defined elsewhere.
    pub is_extension: bool,
    pub private: bool,
    pub title: String,
    pub fields: IndexMap<String, FieldInfo>,
}

impl ResourceInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Adds a field; an empty field provider inherits the resource provider.
    pub fn with_field(mut self, mut field: FieldInfo) -> Self {
        if field.provider.is_empty() {
            field.provider = self.provider.clone();
        }
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn extension(mut self) -> Self {
        self.is_extension = true;
        self
    }
}

/// Definition of one field and the provider that serves it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// Provider that must serve this field.
    pub provider: String,
    pub is_mandatory: bool,
    pub is_private: bool,
    pub is_extension: bool,
    /// The field returns a resource that is created implicitly.
    pub is_implicit_resource: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            ..Default::default()
        }
    }

    pub fn served_by(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}
