//! Provider plugin protocol and its stdio transport.
//!
//! The runtime only ever talks to a provider through [`ProviderPlugin`]; a
//! provider talks back to the runtime through the [`ProviderCallbacks`] it
//! received when the connection was opened.

pub mod connection;
pub mod frame;
pub mod serve;
pub mod stdio;

pub use connection::{ConnectionTable, ProviderConnection};
pub use serve::{serve, serve_io};
pub use stdio::StdioPlugin;

use crate::error::{CallbackError, TransportError};
use async_trait::async_trait;
use inquest_types::{
    CallbackRequest, CallbackResponse, ConnectRequest, ConnectResponse, DataRequest, DataResponse, ResourceData, Schema,
    StoreRequest, StoreResponse,
};
use std::sync::Arc;

/// The operations every provider backend serves.
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// The provider's resource schema, fetched once after start.
    async fn schema(&self) -> Result<Schema, TransportError>;

    /// Opens a connection to the asset in `req`. `callbacks` stays valid for
    /// the lifetime of the returned connection.
    async fn connect(&self, req: ConnectRequest, callbacks: Arc<dyn ProviderCallbacks>) -> Result<ConnectResponse, TransportError>;

    /// Fetches a field, or constructs a resource when `req.field` is empty.
    async fn get_data(&self, req: DataRequest) -> Result<DataResponse, TransportError>;

    /// Stores resources computed elsewhere so later reads can find them.
    async fn store_data(&self, req: StoreRequest) -> Result<StoreResponse, TransportError>;

    /// Closes one connection; the provider keeps serving its other ones.
    async fn disconnect(&self, connection: u32) -> Result<(), TransportError>;

    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Calls a provider makes back into the runtime that owns its connection.
///
/// Implementors only provide [`ProviderCallbacks::handle`]; the typed helpers
/// wrap it.
#[async_trait]
pub trait ProviderCallbacks: Send + Sync {
    async fn handle(&self, req: CallbackRequest) -> Result<CallbackResponse, CallbackError>;

    /// Constructs a resource (empty field) or reads a field through the runtime.
    async fn get_data(&self, req: DataRequest) -> Result<DataResponse, CallbackError> {
        match self.handle(CallbackRequest::from_data_request(req)).await? {
            CallbackResponse::Data(data) => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    /// Reads a resource from the runtime's recording, if it was recorded.
    async fn get_recording(&self, resource: &str, resource_id: &str) -> Result<Option<ResourceData>, CallbackError> {
        let req = CallbackRequest::ReadRecording {
            resource: resource.to_string(),
            resource_id: resource_id.to_string(),
        };
        match self.handle(req).await? {
            CallbackResponse::Recording { resource } => Ok(resource),
            other => Err(unexpected(&other)),
        }
    }

    async fn collect(&self, data: DataResponse) -> Result<(), CallbackError> {
        match self.handle(CallbackRequest::Collect { data }).await? {
            CallbackResponse::Collected => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &CallbackResponse) -> CallbackError {
    CallbackError::Remote {
        message: format!("unexpected callback response: {response:?}"),
    }
}
