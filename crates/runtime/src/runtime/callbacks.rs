//! Callback channel from a connected provider back into its runtime.

use super::{Runtime, RuntimeInner};
use crate::error::CallbackError;
use crate::plugin::ProviderCallbacks;
use async_trait::async_trait;
use inquest_types::{CallbackRequest, CallbackResponse, DataResponse, Primitive, ResourceRef};
use std::sync::{OnceLock, Weak};
use tracing::debug;

/// Handed to a provider on connect. Holds the runtime weakly so a provider
/// keeping its callbacks alive does not keep a closed runtime around.
pub(crate) struct RuntimeCallbacks {
    runtime: Weak<RuntimeInner>,
    provider: String,
    connection: OnceLock<u32>,
}

impl RuntimeCallbacks {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, provider: &str) -> Self {
        Self {
            runtime,
            provider: provider.to_string(),
            connection: OnceLock::new(),
        }
    }

    /// Records the connection id once the provider assigned it.
    pub(crate) fn bind(&self, connection: u32) {
        let _ = self.connection.set(connection);
    }
}

#[async_trait]
impl ProviderCallbacks for RuntimeCallbacks {
    async fn handle(&self, req: CallbackRequest) -> Result<CallbackResponse, CallbackError> {
        let inner = self.runtime.upgrade().ok_or(CallbackError::RuntimeGone)?;
        let runtime = Runtime::from_inner(inner);
        debug!(provider = %self.provider, request = ?req, "provider callback");

        match req {
            CallbackRequest::ConstructResource { resource, args } => {
                let created = runtime.create_resource(&resource, args).await?;
                Ok(CallbackResponse::Data(DataResponse::value(Primitive::Resource(created))))
            }
            CallbackRequest::ReadField {
                resource,
                resource_id,
                field,
            } => {
                let raw = runtime.read_field(&ResourceRef::new(resource, resource_id), &field).await?;
                Ok(CallbackResponse::Data(DataResponse::from(raw)))
            }
            CallbackRequest::ReadRecording { resource, resource_id } => {
                let recorded = match self.connection.get() {
                    Some(&connection) => runtime.recording().get_resource(connection, &resource, &resource_id),
                    None => None,
                };
                Ok(CallbackResponse::Recording { resource: recorded })
            }
            CallbackRequest::Collect { .. } => Err(CallbackError::NotImplemented {
                operation: "collect".to_string(),
            }),
        }
    }
}
