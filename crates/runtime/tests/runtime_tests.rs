use inquest_runtime::error::RuntimeError;
use inquest_runtime::mock::{CallLog, MockField, MockProvider, mock_coordinator};
use inquest_runtime::{CORE_PROVIDER_ID, NETWORK_PROVIDER_ID, RecordingStore, Runtime};
use inquest_types::{
    Asset, CallbackRequest, ConnectRequest, ConnectionConfig, DataResponse, FieldInfo, Primitive, ProviderDescriptor, RawData,
    ResourceInfo, ResourceRef, Schema,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

const OS: &str = "inquest.dev/providers/os";

fn os_schema() -> Schema {
    Schema::default()
        .with_resource(
            ResourceInfo::new("os.file", OS)
                .with_field(FieldInfo::new("path", "string"))
                .with_field(FieldInfo::new("content", "string"))
                .with_field(FieldInfo::new("owner", "string"))
                .with_field(FieldInfo::new("crash", "string"))
                .with_field(FieldInfo::new("collect", "string")),
        )
        .with_resource(ResourceInfo::new("os.hostname", OS).with_field(FieldInfo::new("name", "string")))
}

fn os_provider() -> MockProvider {
    MockProvider::new(
        ProviderDescriptor::new(OS, "os").with_connection_types(["local", "ssh"]),
        os_schema(),
    )
    .with_field("os.file", "content", "127.0.0.1 localhost")
    .with_field_error("os.file", "owner", "permission denied")
    .with_mock_field("os.file", "crash", MockField::Crash)
}

fn network_provider() -> MockProvider {
    let schema = Schema::default().with_resource(
        ResourceInfo::new("os.file", NETWORK_PROVIDER_ID)
            .extension()
            .with_field(FieldInfo::new("certificates", "array")),
    );
    MockProvider::new(ProviderDescriptor::new(NETWORK_PROVIDER_ID, "network"), schema).with_field(
        "os.file",
        "certificates",
        Primitive::Array(vec![Primitive::string("CN=localhost")]),
    )
}

fn ssh_asset() -> Asset {
    Asset {
        name: "10.0.0.1".to_string(),
        platform_ids: vec!["//platform/ssh/10.0.0.1".to_string()],
        connections: vec![ConnectionConfig::new("ssh").with_host("10.0.0.1")],
        ..Asset::default()
    }
}

fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, Primitive> {
    pairs.iter().map(|(k, v)| (k.to_string(), Primitive::string(*v))).collect()
}

async fn connected(runtime: &Runtime) {
    runtime.use_provider(OS).await.unwrap();
    runtime
        .connect(ConnectRequest {
            asset: Some(ssh_asset()),
            ..ConnectRequest::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn detects_ssh_provider_and_caches_field_reads() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();

    let mut asset = ssh_asset();
    runtime.detect_provider(&mut asset).await.unwrap();
    assert_eq!(runtime.provider().unwrap().id(), OS);
    runtime
        .connect(ConnectRequest {
            asset: Some(asset),
            ..ConnectRequest::default()
        })
        .await
        .unwrap();

    let file = runtime.create_resource("os.file", args(&[("path", "/etc/hosts")])).await.unwrap();
    assert_eq!(file, ResourceRef::new("os.file", "/etc/hosts"));

    let mut first = None;
    runtime
        .watch_and_update(&file, "content", "query-1", |raw| first = Some(raw))
        .await
        .unwrap();
    assert_eq!(first, Some(RawData::value(Primitive::string("127.0.0.1 localhost"))));
    assert_eq!(os.stats().fetches(), 1);

    let mut second = None;
    runtime
        .watch_and_update(&file, "content", "query-1", |raw| second = Some(raw))
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(os.stats().fetches(), 1, "second read must come from the recording");

    assert!(runtime.unregister("query-1"));
    assert!(!runtime.unregister("query-1"));
    runtime.close().await;
}

#[tokio::test]
async fn unknown_resource_is_rejected_without_provider_calls() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let err = runtime
        .create_resource("nonexistent.resource", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found in schema"), "{err}");

    let err = runtime
        .read_field(&ResourceRef::new("os.file", "/etc/hosts"), "nonexistent")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::FieldNotFound { .. }));
    assert_eq!(os.stats().get_data(), 0);
}

#[tokio::test]
async fn connect_requires_provider_asset_and_connections() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();

    let err = runtime.connect(ConnectRequest::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NoProviderSelected));

    runtime.use_provider(OS).await.unwrap();
    let err = runtime.connect(ConnectRequest::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NoAsset));

    let err = runtime
        .connect(ConnectRequest {
            asset: Some(Asset::default()),
            ..ConnectRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot connect to asset, no connection info provided");
    assert_eq!(os.stats().connect(), 0);
}

#[tokio::test]
async fn detect_reports_every_failed_connection() {
    let coordinator = mock_coordinator(&[Arc::new(os_provider())]);
    let runtime = coordinator.runtime();

    let mut empty = Asset::default();
    assert!(matches!(
        runtime.detect_provider(&mut empty).await,
        Err(RuntimeError::NothingToDetect)
    ));

    let mut asset = Asset {
        connections: vec![ConnectionConfig::new("k8s"), ConnectionConfig::new("winrm")],
        ..Asset::default()
    };
    match runtime.detect_provider(&mut asset).await {
        Err(RuntimeError::DetectFailed { errors }) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[0].contains("k8s"));
            assert!(errors[1].contains("winrm"));
        }
        other => panic!("expected detect failure, got {other:?}"),
    }
    assert!(runtime.provider().is_none());
}

#[tokio::test]
async fn shared_runtimes_reuse_instances_and_ephemeral_ones_do_not() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);

    let a = coordinator.runtime();
    let b = coordinator.runtime();
    a.use_provider(OS).await.unwrap();
    b.use_provider(OS).await.unwrap();
    assert!(Arc::ptr_eq(&a.provider().unwrap(), &b.provider().unwrap()));

    let c = coordinator.ephemeral_runtime();
    let d = coordinator.ephemeral_runtime();
    c.use_provider(OS).await.unwrap();
    d.use_provider(OS).await.unwrap();
    assert_ne!(c.provider().unwrap().instance_id(), d.provider().unwrap().instance_id());
    assert!(c.provider().unwrap().is_ephemeral());

    // Closing one shared runtime leaves the other one working.
    a.close().await;
    assert_eq!(os.open_connections(), 0);
    assert!(!b.provider().unwrap().is_closed());
    connected(&b).await;
    let raw = b.read_field(&ResourceRef::new("os.file", "/etc/hosts"), "content").await.unwrap();
    assert!(!raw.is_error());

    c.close().await;
    assert!(c.provider().unwrap().is_closed());
    assert!(!d.provider().unwrap().is_closed());
}

#[tokio::test]
async fn cross_provider_field_bridges_into_constructing_provider_first() {
    let log = CallLog::default();
    let os = Arc::new(os_provider().with_call_log(log.clone()));
    let network = Arc::new(network_provider().with_call_log(log.clone()));
    let coordinator = mock_coordinator(&[os.clone(), network.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let file = runtime.create_resource("os.file", args(&[("path", "/etc/hosts")])).await.unwrap();
    let raw = runtime.read_field(&file, "certificates").await.unwrap();
    assert_eq!(
        raw,
        RawData::value(Primitive::Array(vec![Primitive::string("CN=localhost")]))
    );

    let calls: Vec<_> = log
        .entries()
        .into_iter()
        .filter(|c| c.contains(":store_data") || c.contains(":get_data"))
        .collect();
    assert_eq!(
        calls,
        vec![
            "os:store_data os.file".to_string(),
            "network:get_data os.file.certificates".to_string(),
        ]
    );
    assert_eq!(os.stats().store_data(), 1);
    assert_eq!(network.stats().store_data(), 0);
    assert!(os.stored("os.file", "/etc/hosts").is_some());
    assert_eq!(runtime.connected_providers().len(), 2);

    // Cached now: neither the bridge nor the fetch repeats.
    runtime.read_field(&file, "certificates").await.unwrap();
    assert_eq!(os.stats().store_data(), 1);
    assert_eq!(network.stats().fetches(), 1);
}

#[tokio::test]
async fn secondary_provider_must_be_allowed_for_the_asset() {
    const K8S: &str = "inquest.dev/providers/k8s";
    const ARISTA: &str = "inquest.dev/providers/arista";
    let k8s = Arc::new(MockProvider::new(
        ProviderDescriptor::new(K8S, "k8s"),
        Schema::default().with_resource(ResourceInfo::new("k8s.pod", K8S).with_field(FieldInfo::new("name", "string"))),
    ));
    let arista = Arc::new(
        MockProvider::new(
            ProviderDescriptor::new(ARISTA, "arista").with_cross_provider_types([OS]),
            Schema::default().with_resource(ResourceInfo::new("arista.eos", ARISTA).with_field(FieldInfo::new("version", "string"))),
        )
        .with_field("arista.eos", "version", "4.28"),
    );
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os, k8s.clone(), arista.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let err = runtime.create_resource("k8s.pod", BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::IncorrectProvider { .. }), "{err}");
    assert_eq!(k8s.stats().connect(), 0);

    let eos = runtime.create_resource("arista.eos", BTreeMap::new()).await.unwrap();
    let version = runtime.read_field(&eos, "version").await.unwrap();
    assert_eq!(version.data, Some(Primitive::string("4.28")));
    assert_eq!(arista.stats().connect(), 1);
}

#[tokio::test]
async fn core_provider_is_always_allowed() {
    let core = Arc::new(
        MockProvider::new(
            ProviderDescriptor::new(CORE_PROVIDER_ID, "core"),
            Schema::default().with_resource(ResourceInfo::new("asset", CORE_PROVIDER_ID).with_field(FieldInfo::new("name", "string"))),
        )
        .with_field("asset", "name", "10.0.0.1"),
    );
    let coordinator = mock_coordinator(&[Arc::new(os_provider()), core.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let asset = runtime.create_resource("asset", BTreeMap::new()).await.unwrap();
    let name = runtime.read_field(&asset, "name").await.unwrap();
    assert_eq!(name.data, Some(Primitive::string("10.0.0.1")));
    assert_eq!(core.stats().connect(), 1);
}

#[tokio::test]
async fn crash_fails_every_runtime_sharing_the_provider() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let a = coordinator.runtime();
    let b = coordinator.runtime();
    connected(&a).await;
    connected(&b).await;

    let file = ResourceRef::new("os.file", "/etc/hosts");
    let err = a.read_field(&file, "crash").await.unwrap_err();
    assert_eq!(err.to_string(), "the 'os' provider crashed");
    let fetches = os.stats().fetches();

    let again = a.read_field(&file, "content").await.unwrap_err();
    let other = b.read_field(&file, "content").await.unwrap_err();
    assert_eq!(again.to_string(), err.to_string());
    assert_eq!(other.to_string(), err.to_string());
    assert!(b.create_resource("os.file", BTreeMap::new()).await.is_err());
    assert_eq!(os.stats().fetches(), fetches, "no call may reach a crashed provider");
}

#[tokio::test]
async fn field_errors_are_data_and_cached() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let file = ResourceRef::new("os.file", "/etc/shadow");
    let mut seen = None;
    runtime
        .watch_and_update(&file, "owner", "", |raw| seen = Some(raw))
        .await
        .unwrap();
    assert_eq!(seen, Some(RawData::error("permission denied")));

    let again = runtime.read_field(&file, "owner").await.unwrap();
    assert_eq!(again, RawData::error("permission denied"));
    assert_eq!(os.stats().fetches(), 1);
}

#[tokio::test]
async fn watcher_sees_configuration_errors_too() {
    let coordinator = mock_coordinator(&[Arc::new(os_provider())]);
    let runtime = coordinator.runtime();

    let mut seen = None;
    let err = runtime
        .watch_and_update(&ResourceRef::new("os.file", "/etc/hosts"), "content", "w", |raw| seen = Some(raw))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NoProviderSelected));
    assert_eq!(seen.map(|raw| raw.is_error()), Some(true));
}

#[tokio::test]
async fn concurrent_identical_reads_both_fetch() {
    let os = Arc::new(os_provider().with_fetch_barrier(Arc::new(Barrier::new(2))));
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let file = ResourceRef::new("os.file", "/etc/hosts");
    let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(runtime.read_field(&file, "content"), runtime.read_field(&file, "content"))
    })
    .await
    .expect("both reads must reach the provider");
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(os.stats().fetches(), 2);
}

#[tokio::test]
async fn collect_callback_is_not_available() {
    let os = Arc::new(os_provider().with_mock_field(
        "os.file",
        "collect",
        MockField::Callback(CallbackRequest::Collect {
            data: DataResponse::value(Primitive::Bool(true)),
        }),
    ));
    let coordinator = mock_coordinator(&[os]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let raw = runtime
        .read_field(&ResourceRef::new("os.file", "/etc/hosts"), "collect")
        .await
        .unwrap();
    assert!(raw.error.as_deref().is_some_and(|e| e.contains("not implemented")), "{raw:?}");
}

#[tokio::test]
async fn provider_callbacks_read_through_the_runtime() {
    let os = Arc::new(
        os_provider()
            .with_field("os.hostname", "name", "web-1")
            .with_mock_field(
                "os.file",
                "path",
                MockField::Callback(CallbackRequest::ReadField {
                    resource: "os.hostname".into(),
                    resource_id: "os.hostname".into(),
                    field: "name".into(),
                }),
            ),
    );
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let raw = runtime
        .read_field(&ResourceRef::new("os.file", "/etc/hostname"), "path")
        .await
        .unwrap();
    assert_eq!(raw.data, Some(Primitive::string("web-1")));
    // The nested read populated the recording as well.
    assert!(
        runtime
            .read_field(&ResourceRef::new("os.hostname", "os.hostname"), "name")
            .await
            .is_ok()
    );
    assert_eq!(os.stats().fetches(), 2);
}

#[tokio::test]
async fn clone_copies_fields_into_the_constructing_provider() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let src = runtime.create_resource("os.file", args(&[("path", "/etc/hosts")])).await.unwrap();
    let copy = runtime
        .clone_resource(&src, "/tmp/hosts.bak", &["content"], args(&[("path", "/tmp/hosts.bak")]))
        .await
        .unwrap();
    assert_eq!(copy, ResourceRef::new("os.file", "/tmp/hosts.bak"));

    let stored = os.stored("os.file", "/tmp/hosts.bak").unwrap();
    assert_eq!(stored["content"], RawData::value(Primitive::string("127.0.0.1 localhost")));
    assert_eq!(stored["path"], RawData::value(Primitive::string("/tmp/hosts.bak")));
    assert_eq!(stored["__id"], RawData::value(Primitive::string("/tmp/hosts.bak")));

    let fetches = os.stats().fetches();
    let content = runtime.read_field(&copy, "content").await.unwrap();
    assert_eq!(content.data, Some(Primitive::string("127.0.0.1 localhost")));
    assert_eq!(os.stats().fetches(), fetches);
}

#[tokio::test]
async fn close_is_idempotent_and_bounded() {
    let os = Arc::new(os_provider().with_shutdown_delay(Duration::from_secs(30)));
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime_with_shutdown_timeout(Duration::from_millis(50));
    connected(&runtime).await;

    tokio::time::timeout(Duration::from_secs(5), runtime.close())
        .await
        .expect("close must not wait for a slow provider");
    runtime.close().await;
    assert!(runtime.is_closed());
    assert_eq!(os.stats().shutdown(), 1);

    let err = runtime
        .read_field(&ResourceRef::new("os.file", "/etc/hosts"), "content")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Closed));
}

#[tokio::test]
async fn set_recording_rebinds_open_connections() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();
    connected(&runtime).await;

    let recording = Arc::new(RecordingStore::new_in_memory());
    runtime.set_recording(recording.clone());
    runtime
        .read_field(&ResourceRef::new("os.file", "/etc/hosts"), "content")
        .await
        .unwrap();
    assert_eq!(recording.assets(), vec![ssh_asset()]);
    let json = recording.to_json().unwrap();
    assert!(json.contains("127.0.0.1 localhost"), "{json}");
}

#[tokio::test]
async fn closing_a_shared_runtime_drops_only_its_connection() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let a = coordinator.runtime();
    let b = coordinator.runtime();
    connected(&a).await;
    connected(&b).await;
    assert_eq!(os.open_connections(), 2);

    a.close().await;
    assert_eq!(os.open_connections(), 1);
    assert_eq!(os.stats().shutdown(), 0);
    let raw = b.read_field(&ResourceRef::new("os.file", "/etc/hosts"), "content").await.unwrap();
    assert!(!raw.is_error());

    b.close().await;
    assert_eq!(os.open_connections(), 0);
    assert_eq!(os.stats().shutdown(), 1);
}

#[tokio::test]
async fn detect_rewrites_deprecated_backend_in_place() {
    let os = Arc::new(os_provider());
    let coordinator = mock_coordinator(&[os.clone()]);
    let runtime = coordinator.runtime();

    let mut asset = Asset {
        name: "localhost".to_string(),
        connections: vec![ConnectionConfig {
            backend: Some("local_os".to_string()),
            ..ConnectionConfig::default()
        }],
        ..Asset::default()
    };
    runtime.detect_provider(&mut asset).await.unwrap();

    assert_eq!(asset.connections[0].connection_type, "local");
    assert_eq!(asset.connections[0].backend, None);
    assert_eq!(runtime.provider().unwrap().id(), OS);
    runtime
        .connect(ConnectRequest {
            asset: Some(asset),
            ..ConnectRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(os.stats().connect(), 1);
}
