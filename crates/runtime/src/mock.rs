//! In-process provider serving seeded data.
//!
//! Used by tests and by the bundled `inquest-test-provider` executable. Every
//! operation is counted, and an optional shared [`CallLog`] records the order
//! of calls across several mock providers.

use crate::catalog::{InstalledProvider, ProviderCatalog};
use crate::config::AutoUpdateConfig;
use crate::coordinator::{Coordinator, ProviderLauncher, RuntimeDefaults};
use crate::error::{CoordinatorError, TransportError};
use crate::plugin::{ConnectionTable, ProviderCallbacks, ProviderConnection, ProviderPlugin};
use crate::sync::{lock, read, write};
use async_trait::async_trait;
use inquest_types::{
    Asset, CallbackRequest, CallbackResponse, ConnectRequest, ConnectResponse, DataRequest, DataResponse, Primitive,
    ProviderDescriptor, RawData, Schema, StoreRequest, StoreResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Barrier;

/// How a mock answers a field read.
#[derive(Debug, Clone)]
pub enum MockField {
    Value(Primitive),
    /// Field-level error carried in the response.
    Error(String),
    /// The request itself fails.
    Failure(String),
    /// The provider process dies while serving the read.
    Crash,
    /// The field is computed by calling back into the runtime.
    Callback(CallbackRequest),
}

/// Call counters of one mock provider.
#[derive(Debug, Default)]
pub struct MockStats {
    schema: AtomicUsize,
    connect: AtomicUsize,
    constructs: AtomicUsize,
    fetches: AtomicUsize,
    store_data: AtomicUsize,
    shutdown: AtomicUsize,
}

impl MockStats {
    pub fn schema(&self) -> usize {
        self.schema.load(Ordering::SeqCst)
    }

    pub fn connect(&self) -> usize {
        self.connect.load(Ordering::SeqCst)
    }

    /// `get_data` calls constructing a resource.
    pub fn constructs(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    /// `get_data` calls reading a field.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn get_data(&self) -> usize {
        self.constructs() + self.fetches()
    }

    pub fn store_data(&self) -> usize {
        self.store_data.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) -> usize {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Ordered record of calls, shareable between mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    fn push(&self, entry: String) {
        lock(&self.0).push(entry);
    }
}

struct MockConnection {
    id: u32,
    name: String,
    asset: Asset,
    callbacks: Arc<dyn ProviderCallbacks>,
}

impl ProviderConnection for MockConnection {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn asset(&self) -> &Asset {
        &self.asset
    }
}

pub struct MockProvider {
    descriptor: ProviderDescriptor,
    schema: Schema,
    fields: HashMap<(String, String), MockField>,
    stored: RwLock<HashMap<(String, String), BTreeMap<String, RawData>>>,
    connections: ConnectionTable<MockConnection>,
    stats: MockStats,
    log: Option<CallLog>,
    crashed: AtomicBool,
    schema_failure: Mutex<Option<String>>,
    shutdown_delay: Option<Duration>,
    fetch_barrier: Option<Arc<Barrier>>,
}

impl MockProvider {
    pub fn new(descriptor: ProviderDescriptor, schema: Schema) -> Self {
        Self {
            descriptor,
            schema,
            fields: HashMap::new(),
            stored: RwLock::new(HashMap::new()),
            connections: ConnectionTable::new(),
            stats: MockStats::default(),
            log: None,
            crashed: AtomicBool::new(false),
            schema_failure: Mutex::new(None),
            shutdown_delay: None,
            fetch_barrier: None,
        }
    }

    pub fn with_field(self, resource: &str, field: &str, value: impl Into<Primitive>) -> Self {
        self.with_mock_field(resource, field, MockField::Value(value.into()))
    }

    pub fn with_field_error(self, resource: &str, field: &str, message: &str) -> Self {
        self.with_mock_field(resource, field, MockField::Error(message.to_string()))
    }

    pub fn with_mock_field(mut self, resource: &str, field: &str, behavior: MockField) -> Self {
        self.fields.insert((resource.to_string(), field.to_string()), behavior);
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = Some(delay);
        self
    }

    /// Every field read waits on `barrier` before answering.
    pub fn with_fetch_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.fetch_barrier = Some(barrier);
        self
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    /// Connections opened and not yet disconnected.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Simulates the process dying: every later call is unavailable.
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, message: &str) {
        *lock(&self.schema_failure) = Some(message.to_string());
    }

    /// Data stored through `store_data` for a resource instance.
    pub fn stored(&self, resource: &str, id: &str) -> Option<BTreeMap<String, RawData>> {
        read(&self.stored).get(&(resource.to_string(), id.to_string())).cloned()
    }

    fn record(&self, op: &str, target: &str) {
        if let Some(log) = &self.log {
            log.push(format!("{}:{op} {target}", self.descriptor.name));
        }
    }

    fn check_alive(&self) -> Result<(), TransportError> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable(&self.descriptor.id, "connection reset by peer"));
        }
        Ok(())
    }

    fn construct(&self, req: &DataRequest) -> DataResponse {
        self.stats.constructs.fetch_add(1, Ordering::SeqCst);
        self.record("construct", &req.resource);
        if !self.schema.resources.contains_key(&req.resource) {
            return DataResponse::error(format!("resource '{}' is not served by {}", req.resource, self.descriptor.name));
        }
        let id = construction_id(&req.resource, &req.args);
        write(&self.stored).entry((req.resource.clone(), id.clone())).or_default();
        DataResponse::value(Primitive::resource(req.resource.clone(), id))
    }

    async fn fetch(&self, connection: &MockConnection, req: &DataRequest) -> Result<DataResponse, TransportError> {
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        self.record("get_data", &format!("{}.{}", req.resource, req.field));
        if let Some(barrier) = &self.fetch_barrier {
            barrier.wait().await;
        }

        let stored = read(&self.stored)
            .get(&(req.resource.clone(), req.resource_id.clone()))
            .and_then(|fields| fields.get(&req.field))
            .cloned();
        if let Some(raw) = stored {
            return Ok(raw.into());
        }

        let behavior = self.fields.get(&(req.resource.clone(), req.field.clone())).cloned();
        match behavior {
            Some(MockField::Value(value)) => Ok(DataResponse::value(value)),
            Some(MockField::Error(message)) => Ok(DataResponse::error(message)),
            Some(MockField::Failure(message)) => Err(TransportError::remote(message)),
            Some(MockField::Crash) => {
                self.crash();
                self.check_alive().map(|_| DataResponse::default())
            }
            Some(MockField::Callback(request)) => Ok(match connection.callbacks.handle(request).await {
                Ok(CallbackResponse::Data(data)) => data,
                Ok(other) => DataResponse::error(format!("unexpected callback response {other:?}")),
                Err(err) => DataResponse::error(err.to_string()),
            }),
            None => Ok(DataResponse::error(format!(
                "field '{}' of {} is not available",
                req.field, req.resource
            ))),
        }
    }
}

/// Id of a constructed resource: an explicit `__id`, the value of a single
/// argument, or the sorted `key=value` pairs.
fn construction_id(resource: &str, args: &BTreeMap<String, Primitive>) -> String {
    if let Some(id) = args.get("__id") {
        return render(id);
    }
    match args.len() {
        0 => resource.to_string(),
        1 => args.values().next().map(render).unwrap_or_default(),
        _ => args
            .iter()
            .map(|(key, value)| format!("{key}={}", render(value)))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn render(value: &Primitive) -> String {
    match value {
        Primitive::String(s) => s.clone(),
        Primitive::Int(i) => i.to_string(),
        Primitive::Bool(b) => b.to_string(),
        Primitive::Resource(r) => r.id.clone(),
        other => format!("{other:?}"),
    }
}

#[async_trait]
impl ProviderPlugin for MockProvider {
    async fn schema(&self) -> Result<Schema, TransportError> {
        self.stats.schema.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.schema_failure).clone() {
            return Err(TransportError::remote(message));
        }
        Ok(self.schema.clone())
    }

    async fn connect(&self, req: ConnectRequest, callbacks: Arc<dyn ProviderCallbacks>) -> Result<ConnectResponse, TransportError> {
        self.check_alive()?;
        self.stats.connect.fetch_add(1, Ordering::SeqCst);
        let asset = req.asset.unwrap_or_default();
        self.record("connect", &asset.name);

        let connection = self.connections.insert(MockConnection {
            id: self.connections.next_id(),
            name: format!("{} connection", self.descriptor.name),
            asset,
            callbacks,
        });
        Ok(ConnectResponse {
            id: connection.id(),
            name: connection.name().to_string(),
            asset: connection.asset().clone(),
        })
    }

    async fn get_data(&self, req: DataRequest) -> Result<DataResponse, TransportError> {
        self.check_alive()?;
        let connection = self.connections.get(req.connection)?;
        if req.field.is_empty() {
            return Ok(self.construct(&req));
        }
        self.fetch(&connection, &req).await
    }

    async fn store_data(&self, req: StoreRequest) -> Result<StoreResponse, TransportError> {
        self.check_alive()?;
        self.connections.get(req.connection)?;
        self.stats.store_data.fetch_add(1, Ordering::SeqCst);

        let mut stored = write(&self.stored);
        for resource in req.resources {
            self.record("store_data", &resource.name);
            stored.entry((resource.name, resource.id)).or_default().extend(resource.fields);
        }
        Ok(StoreResponse::default())
    }

    async fn disconnect(&self, connection: u32) -> Result<(), TransportError> {
        self.check_alive()?;
        self.record("disconnect", &connection.to_string());
        self.connections
            .remove(connection)
            .map(|_| ())
            .ok_or_else(|| TransportError::remote(format!("connection {connection} not found")))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.stats.shutdown.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.shutdown_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Launches registered mock providers instead of processes.
#[derive(Default)]
pub struct MockLauncher {
    providers: HashMap<String, Arc<MockProvider>>,
    launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<MockProvider>) -> Self {
        self.providers.insert(provider.descriptor.id.clone(), provider);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderLauncher for MockLauncher {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ProviderPlugin>, CoordinatorError> {
        let provider = self
            .providers
            .get(&descriptor.id)
            .cloned()
            .ok_or_else(|| CoordinatorError::spawn_failed(&descriptor.id, "no mock registered"))?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(provider)
    }
}

/// A coordinator whose catalog lists `providers`, schemas included, and
/// which launches them in-process.
pub fn mock_coordinator(providers: &[Arc<MockProvider>]) -> Arc<Coordinator> {
    let catalog = Arc::new(ProviderCatalog::new());
    let mut launcher = MockLauncher::new();
    for provider in providers {
        catalog.register(InstalledProvider::new(provider.descriptor.clone()).with_schema(provider.schema.clone()));
        launcher = launcher.with_provider(provider.clone());
    }
    let defaults = RuntimeDefaults {
        auto_update: AutoUpdateConfig::disabled(),
        ..RuntimeDefaults::default()
    };
    Arc::new(Coordinator::new(catalog, Arc::new(launcher)).with_defaults(defaults))
}
