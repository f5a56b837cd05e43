//! Request and response messages of the provider protocol.
//!
//! The runtime speaks four operations to a provider (connect, get data,
//! store data, shutdown) and a provider may call back into the runtime with a
//! [`CallbackRequest`] while it computes a field.

use crate::{Asset, Primitive, RawData, ResourceRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credentials and endpoint of an upstream service, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamConfig {
    pub api_endpoint: String,
    pub space_mrn: String,
    pub incognito: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectRequest {
    pub asset: Option<Asset>,
    pub upstream: Option<UpstreamConfig>,
    pub features: Vec<String>,
    /// The connection is backed by a recording instead of a live target.
    pub has_recording: bool,
}

/// A provider-assigned connection to one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectResponse {
    pub id: u32,
    pub name: String,
    /// The asset as seen by the provider, possibly enriched with ids.
    pub asset: Asset,
}

/// Requests a field of a resource. An empty `field` asks the provider to
/// construct (or identify) the resource from `args` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataRequest {
    pub connection: u32,
    pub resource: String,
    pub resource_id: String,
    pub field: String,
    pub args: BTreeMap<String, Primitive>,
}

impl DataRequest {
    /// Request constructing `resource` from `args`.
    pub fn construct(connection: u32, resource: impl Into<String>, args: BTreeMap<String, Primitive>) -> Self {
        Self {
            connection,
            resource: resource.into(),
            args,
            ..Default::default()
        }
    }

    /// Request one field of an existing resource.
    pub fn field(connection: u32, resource: &ResourceRef, field: impl Into<String>) -> Self {
        Self {
            connection,
            resource: resource.name.clone(),
            resource_id: resource.id.clone(),
            field: field.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Primitive>,
    /// Field-level failure reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
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

    pub fn into_raw(self) -> RawData {
        match self.error {
            Some(error) => RawData::error(error),
            None => RawData {
                data: self.data,
                error: None,
            },
        }
    }
}

impl From<RawData> for DataResponse {
    fn from(raw: RawData) -> Self {
        Self {
            data: raw.data,
            error: raw.error,
        }
    }
}

/// Resource instance with a subset of its fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceData {
    pub name: String,
    pub id: String,
    pub fields: BTreeMap<String, RawData>,
}

impl ResourceData {
    /// A placeholder with no fields, used to share identity across providers.
    pub fn reference(resource: &ResourceRef) -> Self {
        Self {
            name: resource.name.clone(),
            id: resource.id.clone(),
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRequest {
    pub connection: u32,
    pub resources: Vec<ResourceData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreResponse {
    /// Per-resource errors keyed by `name\0id`.
    pub errors: BTreeMap<String, String>,
}

/// A call a provider makes back into the runtime that owns its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CallbackRequest {
    ConstructResource {
        resource: String,
        args: BTreeMap<String, Primitive>,
    },
    ReadField {
        resource: String,
        resource_id: String,
        field: String,
    },
    ReadRecording {
        resource: String,
        resource_id: String,
    },
    Collect {
        data: DataResponse,
    },
}

impl CallbackRequest {
    /// Classifies a provider's data request: no field means construction.
    pub fn from_data_request(req: DataRequest) -> Self {
        if req.field.is_empty() {
            CallbackRequest::ConstructResource {
                resource: req.resource,
                args: req.args,
            }
        } else {
            CallbackRequest::ReadField {
                resource: req.resource,
                resource_id: req.resource_id,
                field: req.field,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackResponse {
    Data(DataResponse),
    Recording { resource: Option<ResourceData> },
    Collected,
}
