//! Provider executable serving seeded `os` data over stdio.
//!
//! Used by integration tests to exercise the process transport. Reading the
//! `crash` field of `os.file` terminates the process.

use async_trait::async_trait;
use inquest_runtime::error::TransportError;
use inquest_runtime::mock::{MockField, MockProvider};
use inquest_runtime::plugin::{ProviderCallbacks, ProviderPlugin, serve};
use inquest_types::{
    CallbackRequest, ConnectRequest, ConnectResponse, DataRequest, DataResponse, FieldInfo, ProviderDescriptor, ResourceInfo,
    Schema, StoreRequest, StoreResponse,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PROVIDER_ID: &str = "inquest.dev/providers/os";

struct ExitingProvider {
    inner: MockProvider,
}

#[async_trait]
impl ProviderPlugin for ExitingProvider {
    async fn schema(&self) -> Result<Schema, TransportError> {
        self.inner.schema().await
    }

    async fn connect(&self, req: ConnectRequest, callbacks: Arc<dyn ProviderCallbacks>) -> Result<ConnectResponse, TransportError> {
        self.inner.connect(req, callbacks).await
    }

    async fn get_data(&self, req: DataRequest) -> Result<DataResponse, TransportError> {
        if req.field == "crash" {
            error!(resource = %req.resource, "crash requested");
            std::process::exit(3);
        }
        self.inner.get_data(req).await
    }

    async fn store_data(&self, req: StoreRequest) -> Result<StoreResponse, TransportError> {
        self.inner.store_data(req).await
    }

    async fn disconnect(&self, connection: u32) -> Result<(), TransportError> {
        self.inner.disconnect(connection).await
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.inner.shutdown().await
    }
}

fn schema() -> Schema {
    Schema::default()
        .with_resource(
            ResourceInfo::new("os.file", PROVIDER_ID)
                .with_field(FieldInfo::new("path", "string"))
                .with_field(FieldInfo::new("size", "int"))
                .with_field(FieldInfo::new("permissions", "string"))
                .with_field(FieldInfo::new("owner", "string"))
                .with_field(FieldInfo::new("crash", "string")),
        )
        .with_resource(ResourceInfo::new("os.hostname", PROVIDER_ID).with_field(FieldInfo::new("name", "string")))
}

fn provider() -> ExitingProvider {
    let descriptor = ProviderDescriptor::new(PROVIDER_ID, "os").with_connection_types(["local", "ssh"]);
    let inner = MockProvider::new(descriptor, schema())
        .with_field("os.file", "size", 42i64)
        .with_field("os.file", "permissions", "-rw-r--r--")
        .with_field_error("os.file", "path", "path is only known to the constructor")
        .with_field("os.hostname", "name", "test-host")
        .with_mock_field(
            "os.file",
            "owner",
            MockField::Callback(CallbackRequest::ReadField {
                resource: "os.hostname".to_string(),
                resource_id: "os.hostname".to_string(),
                field: "name".to_string(),
            }),
        );
    ExitingProvider { inner }
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!(provider = PROVIDER_ID, "serving");
    if let Err(err) = serve(PROVIDER_ID, Arc::new(provider())).await {
        error!(error = %err, "provider stopped");
        std::process::exit(1);
    }
}
