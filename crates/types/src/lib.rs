//! Shared type definitions for the Inquest runtime.
//!
//! These types are exchanged between the runtime, provider processes and the
//! recording files, so every one of them round-trips through serde.

pub mod asset;
pub mod protocol;
pub mod provider;
pub mod schema;
pub mod value;

pub use asset::{Asset, ConnectionConfig, connection_type_for_backend};
pub use protocol::{
    CallbackRequest, CallbackResponse, ConnectRequest, ConnectResponse, DataRequest, DataResponse, ResourceData, StoreRequest,
    StoreResponse, UpstreamConfig,
};
pub use provider::ProviderDescriptor;
pub use schema::{FieldInfo, ResourceInfo, Schema};
pub use value::{Primitive, RawData, ResourceRef};
