use async_trait::async_trait;
use inquest_runtime::error::{CoordinatorError, RuntimeError};
use inquest_runtime::mock::{MockField, MockProvider};
use inquest_runtime::plugin::serve_io;
use inquest_runtime::{
    AutoUpdateConfig, Coordinator, InstalledProvider, ProcessLauncher, ProviderCatalog, ProviderLauncher, ProviderPlugin,
    RuntimeDefaults, StdioPlugin,
};
use inquest_types::{
    Asset, CallbackRequest, ConnectRequest, ConnectionConfig, FieldInfo, Primitive, ProviderDescriptor, ResourceInfo,
    ResourceRef, Schema,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{BufReader, duplex};

const OS: &str = "inquest.dev/providers/os";

/// Serves a mock provider over in-memory pipes using the real framing.
struct DuplexLauncher {
    provider: Arc<MockProvider>,
}

#[async_trait]
impl ProviderLauncher for DuplexLauncher {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ProviderPlugin>, CoordinatorError> {
        let (host_read, provider_write) = duplex(64 * 1024);
        let (provider_read, host_write) = duplex(64 * 1024);
        let provider: Arc<dyn ProviderPlugin> = self.provider.clone();
        let id = descriptor.id.clone();
        tokio::spawn(async move { serve_io(&id, provider, BufReader::new(provider_read), provider_write).await });

        let plugin = StdioPlugin::connect_io(descriptor.id.clone(), BufReader::new(host_read), host_write, Duration::from_secs(5)).await?;
        Ok(Arc::new(plugin))
    }
}

fn coordinator(descriptor: ProviderDescriptor, launcher: Arc<dyn ProviderLauncher>) -> Arc<Coordinator> {
    let catalog = Arc::new(ProviderCatalog::new());
    catalog.register(InstalledProvider::new(descriptor));
    Arc::new(Coordinator::new(catalog, launcher).with_defaults(RuntimeDefaults {
        auto_update: AutoUpdateConfig::disabled(),
        ..RuntimeDefaults::default()
    }))
}

fn connect_request() -> ConnectRequest {
    ConnectRequest {
        asset: Some(Asset {
            name: "localhost".to_string(),
            connections: vec![ConnectionConfig::new("local")],
            ..Asset::default()
        }),
        ..ConnectRequest::default()
    }
}

#[tokio::test]
async fn runtime_reads_and_serves_callbacks_over_the_stdio_framing() {
    let schema = Schema::default()
        .with_resource(
            ResourceInfo::new("os.file", OS)
                .with_field(FieldInfo::new("size", "int"))
                .with_field(FieldInfo::new("owner", "string")),
        )
        .with_resource(ResourceInfo::new("os.hostname", OS).with_field(FieldInfo::new("name", "string")));
    let mock = Arc::new(
        MockProvider::new(ProviderDescriptor::new(OS, "os").with_connection_types(["local"]), schema)
            .with_field("os.file", "size", 42i64)
            .with_field("os.hostname", "name", "web-1")
            .with_mock_field(
                "os.file",
                "owner",
                MockField::Callback(CallbackRequest::ReadField {
                    resource: "os.hostname".into(),
                    resource_id: "os.hostname".into(),
                    field: "name".into(),
                }),
            ),
    );
    let coordinator = coordinator(mock.descriptor().clone(), Arc::new(DuplexLauncher { provider: mock.clone() }));
    let runtime = coordinator.runtime();
    runtime.use_provider(OS).await.unwrap();
    runtime.connect(connect_request()).await.unwrap();

    let file = runtime
        .create_resource("os.file", [("path".to_string(), Primitive::string("/etc/hosts"))].into())
        .await
        .unwrap();
    assert_eq!(file, ResourceRef::new("os.file", "/etc/hosts"));

    let size = runtime.read_field(&file, "size").await.unwrap();
    assert_eq!(size.data, Some(Primitive::Int(42)));

    let owner = runtime.read_field(&file, "owner").await.unwrap();
    assert_eq!(owner.data, Some(Primitive::string("web-1")));
    assert_eq!(mock.stats().fetches(), 3);

    runtime.close().await;
    assert_eq!(mock.stats().shutdown(), 1);
}

#[tokio::test]
async fn provider_process_end_to_end() {
    let mut descriptor = ProviderDescriptor::new(OS, "os").with_connection_types(["local", "ssh"]);
    descriptor.path = Some(PathBuf::from(env!("CARGO_BIN_EXE_inquest-test-provider")));
    let coordinator = coordinator(descriptor, Arc::new(ProcessLauncher::default()));
    let runtime = coordinator.runtime();

    let mut asset = connect_request().asset.unwrap();
    runtime.detect_provider(&mut asset).await.unwrap();
    runtime
        .connect(ConnectRequest {
            asset: Some(asset),
            ..ConnectRequest::default()
        })
        .await
        .unwrap();

    let file = runtime
        .create_resource("os.file", [("path".to_string(), Primitive::string("/etc/hosts"))].into())
        .await
        .unwrap();
    let size = runtime.read_field(&file, "size").await.unwrap();
    assert_eq!(size.data, Some(Primitive::Int(42)));

    let owner = runtime.read_field(&file, "owner").await.unwrap();
    assert_eq!(owner.data, Some(Primitive::string("test-host")));

    let path = runtime.read_field(&file, "path").await.unwrap();
    assert!(path.is_error());

    // The process exits while serving this read.
    let err = runtime.read_field(&file, "crash").await.unwrap_err();
    assert!(matches!(err, RuntimeError::ProviderCrashed { .. }), "{err}");
    let err = runtime.read_field(&file, "permissions").await.unwrap_err();
    assert_eq!(err.to_string(), "the 'os' provider crashed");

    tokio::time::timeout(Duration::from_secs(10), runtime.close())
        .await
        .expect("closing after a crash must not hang");
}
