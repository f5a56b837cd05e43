//! Process lifecycle of provider backends, shared by every runtime.
//!
//! The coordinator is the only owner of the running-instance table. Shared
//! instances are reference counted: each `start` of a non-ephemeral provider
//! takes a reference and each `stop` releases one; the process goes away when
//! the last reference does. Ephemeral instances belong to a single runtime
//! and are shut down as soon as it stops them.

use crate::catalog::{InstallRequest, InstalledProvider, ProviderCatalog, ProviderInstaller};
use crate::config::{AutoUpdateConfig, InquestConfig};
use crate::error::{CoordinatorError, RuntimeError, TransportError};
use crate::plugin::{ProviderPlugin, StdioPlugin};
use crate::runtime::Runtime;
use crate::schema::SchemaRegistry;
use crate::sync::lock;
use async_trait::async_trait;
use inquest_types::{ProviderDescriptor, Schema, UpstreamConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Starts the backend for an installed provider.
#[async_trait]
pub trait ProviderLauncher: Send + Sync {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ProviderPlugin>, CoordinatorError>;
}

/// Launches providers as child processes speaking the stdio protocol.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    handshake_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ProviderLauncher for ProcessLauncher {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ProviderPlugin>, CoordinatorError> {
        let plugin = StdioPlugin::spawn(descriptor, self.handshake_timeout).await?;
        Ok(Arc::new(plugin))
    }
}

/// A provider backend started by the coordinator.
pub struct RunningProvider {
    descriptor: ProviderDescriptor,
    schema: Schema,
    instance_id: u64,
    ephemeral: bool,
    plugin: Arc<dyn ProviderPlugin>,
    closed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl fmt::Debug for RunningProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningProvider")
            .field("id", &self.descriptor.id)
            .field("instance_id", &self.instance_id)
            .field("ephemeral", &self.ephemeral)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RunningProvider {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Unique per started instance, even for the same provider id.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn plugin(&self) -> &Arc<dyn ProviderPlugin> {
        &self.plugin
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The error that closed this instance, if it crashed.
    pub fn failure(&self) -> Option<String> {
        lock(&self.failure).clone()
    }

    /// Closes the instance for good after its process became unavailable.
    pub fn mark_crashed(&self, err: &TransportError) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_some() {
                return;
            }
            *failure = Some(err.to_string());
        }
        self.closed.store(true, Ordering::SeqCst);
        error!(provider = %self.descriptor.id, instance = self.instance_id, error = %err, "provider crashed");
    }

    /// Fails fast when the instance crashed or was stopped.
    pub fn ensure_alive(&self) -> Result<(), RuntimeError> {
        if lock(&self.failure).is_some() {
            return Err(RuntimeError::ProviderCrashed {
                provider: self.descriptor.name.clone(),
            });
        }
        if self.is_closed() {
            return Err(RuntimeError::ProviderStopped {
                provider: self.descriptor.name.clone(),
            });
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(provider = %self.descriptor.id, instance = self.instance_id, "shutting down provider");
        self.plugin.shutdown().await
    }
}

/// Settings every runtime created by a coordinator starts with.
#[derive(Debug, Clone)]
pub struct RuntimeDefaults {
    pub shutdown_timeout: Duration,
    pub auto_update: AutoUpdateConfig,
    pub features: Vec<String>,
    pub upstream: Option<UpstreamConfig>,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        let config = InquestConfig::default();
        Self {
            shutdown_timeout: config.shutdown_timeout(),
            auto_update: config.auto_update,
            features: Vec::new(),
            upstream: None,
        }
    }
}

struct SharedEntry {
    instance: Arc<RunningProvider>,
    refs: usize,
}

/// Owns every running provider instance.
pub struct Coordinator {
    catalog: Arc<ProviderCatalog>,
    launcher: Arc<dyn ProviderLauncher>,
    installer: Option<Arc<dyn ProviderInstaller>>,
    defaults: RuntimeDefaults,
    running: tokio::sync::Mutex<HashMap<String, SharedEntry>>,
    ephemeral: Mutex<HashMap<u64, Arc<RunningProvider>>>,
    next_instance: AtomicU64,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("catalog", &self.catalog)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(catalog: Arc<ProviderCatalog>, launcher: Arc<dyn ProviderLauncher>) -> Self {
        Self {
            catalog,
            launcher,
            installer: None,
            defaults: RuntimeDefaults::default(),
            running: tokio::sync::Mutex::new(HashMap::new()),
            ephemeral: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
        }
    }

    /// A coordinator launching provider processes found in the configured
    /// provider directories.
    pub fn from_config(config: &InquestConfig) -> Self {
        let catalog = Arc::new(ProviderCatalog::load(&config.provider_dirs()));
        Self::new(catalog, Arc::new(ProcessLauncher::default())).with_defaults(RuntimeDefaults {
            shutdown_timeout: config.shutdown_timeout(),
            auto_update: config.auto_update.clone(),
            features: config.features.clone(),
            upstream: config.upstream.clone(),
        })
    }

    pub fn with_installer(mut self, installer: Arc<dyn ProviderInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_defaults(mut self, defaults: RuntimeDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    pub fn defaults(&self) -> &RuntimeDefaults {
        &self.defaults
    }

    /// A runtime sharing provider instances with other runtimes.
    pub fn runtime(self: &Arc<Self>) -> Runtime {
        self.runtime_with_shutdown_timeout(self.defaults.shutdown_timeout)
    }

    pub fn runtime_with_shutdown_timeout(self: &Arc<Self>, shutdown_timeout: Duration) -> Runtime {
        Runtime::new(self.clone(), false, shutdown_timeout, self.schema_registry())
    }

    /// A runtime whose primary provider is started exclusively for it.
    pub fn ephemeral_runtime(self: &Arc<Self>) -> Runtime {
        Runtime::new(self.clone(), true, self.defaults.shutdown_timeout, self.schema_registry())
    }

    fn schema_registry(&self) -> SchemaRegistry {
        SchemaRegistry::with_source(self.catalog.clone())
    }

    /// Returns a running instance of `provider_id`, starting one if needed.
    ///
    /// Non-ephemeral starts reuse the shared instance when there is one, even
    /// one that crashed: its callers then fail with the recorded error.
    pub async fn start(&self, provider_id: &str, ephemeral: bool, auto_update: &AutoUpdateConfig) -> Result<Arc<RunningProvider>, CoordinatorError> {
        if ephemeral {
            let instance = self.launch(provider_id, true, auto_update).await?;
            lock(&self.ephemeral).insert(instance.instance_id(), instance.clone());
            return Ok(instance);
        }

        // Held across the launch so concurrent starts of one id share it.
        let mut running = self.running.lock().await;
        if let Some(entry) = running.get_mut(provider_id) {
            entry.refs += 1;
            debug!(provider = %provider_id, refs = entry.refs, "reusing running provider");
            return Ok(entry.instance.clone());
        }

        let instance = self.launch(provider_id, false, auto_update).await?;
        running.insert(
            provider_id.to_string(),
            SharedEntry {
                instance: instance.clone(),
                refs: 1,
            },
        );
        Ok(instance)
    }

    /// Releases an instance obtained from [`Coordinator::start`].
    ///
    /// Ephemeral instances shut down immediately. A shared instance only shuts
    /// down once its last reference is released; `force` cannot override that
    /// while other runtimes still use it.
    pub async fn stop(&self, instance: &Arc<RunningProvider>, force: bool) -> Result<(), TransportError> {
        if instance.is_ephemeral() {
            lock(&self.ephemeral).remove(&instance.instance_id());
            info!(provider = %instance.id(), instance = instance.instance_id(), "stopping ephemeral provider");
            return instance.shutdown().await;
        }

        {
            let mut running = self.running.lock().await;
            let Some(entry) = running.get_mut(instance.id()) else {
                return Ok(());
            };
            if entry.instance.instance_id() != instance.instance_id() {
                return Ok(());
            }
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                if force {
                    warn!(provider = %instance.id(), refs = entry.refs, "provider is still in use, not stopping it");
                } else {
                    debug!(provider = %instance.id(), refs = entry.refs, "released provider reference");
                }
                return Ok(());
            }
            running.remove(instance.id());
        }

        info!(provider = %instance.id(), instance = instance.instance_id(), "stopping provider");
        instance.shutdown().await
    }

    /// Number of runtimes holding the shared instance of `provider_id`.
    pub async fn reference_count(&self, provider_id: &str) -> usize {
        self.running.lock().await.get(provider_id).map_or(0, |entry| entry.refs)
    }

    /// Every instance currently owned by the coordinator.
    pub async fn running(&self) -> Vec<Arc<RunningProvider>> {
        let mut instances: Vec<_> = self.running.lock().await.values().map(|e| e.instance.clone()).collect();
        instances.extend(lock(&self.ephemeral).values().cloned());
        instances
    }

    /// Makes sure a provider for `connection_type` is installed.
    pub async fn ensure_provider(&self, connection_type: &str, auto_update: &AutoUpdateConfig) -> Result<ProviderDescriptor, CoordinatorError> {
        let installed = self
            .installed(InstallRequest::ForConnection(connection_type.to_string()), auto_update)
            .await?;
        Ok(installed.descriptor)
    }

    /// Stops every instance regardless of outstanding references.
    pub async fn shutdown(&self) {
        let shared: Vec<_> = self.running.lock().await.drain().map(|(_, entry)| entry.instance).collect();
        let ephemeral: Vec<_> = lock(&self.ephemeral).drain().map(|(_, instance)| instance).collect();

        for instance in shared.into_iter().chain(ephemeral) {
            if let Err(err) = instance.shutdown().await {
                warn!(provider = %instance.id(), error = %err, "provider shutdown failed");
            }
        }
    }

    async fn launch(&self, provider_id: &str, ephemeral: bool, auto_update: &AutoUpdateConfig) -> Result<Arc<RunningProvider>, CoordinatorError> {
        let installed = self.installed(InstallRequest::ById(provider_id.to_string()), auto_update).await?;
        let plugin = self.launcher.launch(&installed.descriptor).await?;

        let schema = match plugin.schema().await {
            Ok(schema) => schema,
            Err(source) => {
                if let Err(err) = plugin.shutdown().await {
                    debug!(provider = %provider_id, error = %err, "shutdown after schema failure");
                }
                return Err(CoordinatorError::SchemaFailed {
                    provider: provider_id.to_string(),
                    source,
                });
            }
        };

        let instance_id = self.next_instance.fetch_add(1, Ordering::SeqCst);
        info!(provider = %provider_id, instance = instance_id, ephemeral, "provider started");
        Ok(Arc::new(RunningProvider {
            descriptor: installed.descriptor,
            schema,
            instance_id,
            ephemeral,
            plugin,
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
        }))
    }

    async fn installed(&self, request: InstallRequest, auto_update: &AutoUpdateConfig) -> Result<InstalledProvider, CoordinatorError> {
        let found = match &request {
            InstallRequest::ById(id) => self.catalog.get(id),
            InstallRequest::ForConnection(connection_type) => self.catalog.for_connection_type(connection_type),
        };
        if let Some(installed) = found {
            return Ok(installed);
        }

        match &self.installer {
            Some(installer) if auto_update.enabled => {
                info!(request = ?request, "installing missing provider");
                let installed = installer.install(&request, auto_update).await?;
                self.catalog.register(installed.clone());
                Ok(installed)
            }
            _ => Err(match request {
                InstallRequest::ById(provider) => CoordinatorError::NotInstalled { provider },
                InstallRequest::ForConnection(connection_type) => CoordinatorError::NoProviderForConnection { connection_type },
            }),
        }
    }
}
